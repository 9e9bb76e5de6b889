//! Physical Plan
//!
//! An ordered list of stages. Each stage names the handler implementing it, its
//! parallelism and the earlier stages it reads from. Parents must precede their children,
//! so plan order is already a topological order.

use super::types::{StageId, TaskGroupId};
use crate::error::{RuntimeError, RuntimeResult};
use crate::shuffle::partitioner::HashPartitioner;
use crate::shuffle::types::SubRangeSpan;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StageSpec {
    pub handler: String,
    pub parallelism: u32,
    pub parents: Vec<StageId>,
}

#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub id: StageId,
    pub handler: String,
    pub parallelism: u32,
    pub parents: Vec<StageId>,
    pub children: Vec<StageId>,
    /// Fixed when the plan is built: `multiplier × parallelism of the first child`, or a
    /// single sub-range for a sink stage.
    pub output: HashPartitioner,
}

impl PlannedStage {
    pub fn is_sink(&self) -> bool {
        self.children.is_empty()
    }

    pub fn task_groups(&self) -> impl Iterator<Item = TaskGroupId> + '_ {
        (0..self.parallelism).map(move |index| TaskGroupId {
            stage: self.id,
            index,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PhysicalPlan {
    stages: Vec<PlannedStage>,
}

#[derive(Debug, Default)]
pub struct PlanBuilder {
    stages: Vec<StageSpec>,
}

impl PlanBuilder {
    /// Appends a stage and returns its id for use as a parent of later stages.
    pub fn stage(&mut self, handler: impl Into<String>, parallelism: u32, parents: &[StageId]) -> StageId {
        let id = StageId(self.stages.len() as u32);
        self.stages.push(StageSpec {
            handler: handler.into(),
            parallelism,
            parents: parents.to_vec(),
        });
        id
    }

    pub fn build(self, hash_range_multiplier: u32) -> RuntimeResult<PhysicalPlan> {
        PhysicalPlan::from_specs(self.stages, hash_range_multiplier)
    }
}

impl PhysicalPlan {
    pub fn builder() -> PlanBuilder {
        PlanBuilder::default()
    }

    pub fn from_specs(specs: Vec<StageSpec>, hash_range_multiplier: u32) -> RuntimeResult<Self> {
        if specs.is_empty() {
            return Err(RuntimeError::InvalidPlan("plan has no stages".to_string()));
        }

        for (position, spec) in specs.iter().enumerate() {
            if spec.parallelism == 0 {
                return Err(RuntimeError::InvalidPlan(format!(
                    "stage-{} has zero parallelism",
                    position
                )));
            }
            for (i, parent) in spec.parents.iter().enumerate() {
                if parent.0 as usize >= position {
                    return Err(RuntimeError::InvalidPlan(format!(
                        "stage-{} reads from {}, which does not precede it",
                        position, parent
                    )));
                }
                if spec.parents[..i].contains(parent) {
                    return Err(RuntimeError::InvalidPlan(format!(
                        "stage-{} lists {} twice",
                        position, parent
                    )));
                }
            }
        }

        let mut children: Vec<Vec<StageId>> = vec![Vec::new(); specs.len()];
        for (position, spec) in specs.iter().enumerate() {
            for parent in &spec.parents {
                children[parent.0 as usize].push(StageId(position as u32));
            }
        }

        let mut stages = Vec::with_capacity(specs.len());
        for (position, (spec, children)) in specs.iter().zip(children).enumerate() {
            let output = match children.first() {
                Some(first) => HashPartitioner::new(
                    hash_range_multiplier,
                    specs[first.0 as usize].parallelism,
                )?,
                None => HashPartitioner::new(1, 1)?,
            };
            for child in &children {
                let consumers = specs[child.0 as usize].parallelism;
                if consumers > output.sub_range_count() {
                    return Err(RuntimeError::InvalidPlan(format!(
                        "{} has {} consumers but stage-{} only produces {} sub-ranges",
                        child,
                        consumers,
                        position,
                        output.sub_range_count()
                    )));
                }
            }

            stages.push(PlannedStage {
                id: StageId(position as u32),
                handler: spec.handler.clone(),
                parallelism: spec.parallelism,
                parents: spec.parents.clone(),
                children,
                output,
            });
        }

        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[PlannedStage] {
        &self.stages
    }

    pub fn stage(&self, id: StageId) -> Option<&PlannedStage> {
        self.stages.get(id.0 as usize)
    }

    /// Every task group, in plan order.
    pub fn task_groups(&self) -> Vec<TaskGroupId> {
        self.stages.iter().flat_map(|stage| stage.task_groups()).collect()
    }

    pub fn task_group_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.parallelism as usize).sum()
    }

    /// Sub-ranges of `parent`'s output read by `consumer`.
    pub fn input_span(&self, consumer: TaskGroupId, parent: StageId) -> RuntimeResult<SubRangeSpan> {
        let stage = self.stage(consumer.stage).ok_or_else(|| unknown_stage(consumer.stage))?;
        let producer = self.stage(parent).ok_or_else(|| unknown_stage(parent))?;
        if !stage.parents.contains(&parent) {
            return Err(RuntimeError::InvalidPlan(format!(
                "{} does not read from {}",
                consumer.stage, parent
            )));
        }

        let partitioner = &producer.output;
        if stage.parallelism == partitioner.downstream_parallelism() {
            partitioner.span_for(consumer.index)
        } else {
            partitioner.span_for_parallelism(consumer.index, stage.parallelism)
        }
    }
}

fn unknown_stage(id: StageId) -> RuntimeError {
    RuntimeError::InvalidPlan(format!("unknown {}", id))
}
