use clap::Parser;
use dataflow_runtime::config::RuntimeConfig;
use dataflow_runtime::executor::context::TaskContext;
use dataflow_runtime::executor::registry::TaskHandlerRegistry;
use dataflow_runtime::master::handlers::router;
use dataflow_runtime::master::local::LocalCluster;
use dataflow_runtime::scheduler::plan::PhysicalPlan;
use dataflow_runtime::scheduler::types::JobOutcome;
use dataflow_runtime::shuffle::types::Record;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const SAMPLE_TEXT: &str = "\
the hash range multiplier splits every stage output into more sub-ranges than consumers
a consumer reads a contiguous span of sub-ranges from every producer
blocks are immutable and live on the executor that produced them
when an executor is lost its blocks are lost with it and the producer runs again";

#[derive(Parser, Debug)]
#[command(name = "dataflow-node")]
#[command(about = "Runs a word-count job on an in-process dataflow cluster", long_about = None)]
struct Args {
    /// Number of executors to start.
    #[arg(long, default_value = "3")]
    executors: usize,

    /// Slots per executor. Overrides the config file.
    #[arg(long)]
    capacity: Option<usize>,

    /// JSON runtime configuration; missing fields keep their defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Text file to count words in. A built-in sample is used when absent.
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long, default_value = "4")]
    split_parallelism: u32,

    #[arg(long, default_value = "2")]
    count_parallelism: u32,

    /// Address of the HTTP status/registration surface.
    #[arg(long, default_value = "127.0.0.1:8080")]
    http: SocketAddr,

    /// Keep serving HTTP after the job finishes, until Ctrl+C.
    #[arg(long)]
    serve: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RuntimeConfig::from_json_str(&tokio::fs::read_to_string(path).await?)?,
        None => RuntimeConfig::default(),
    };
    if let Some(capacity) = args.capacity {
        config.cluster.executor_capacity = capacity;
    }
    config.validate()?;

    let text = match &args.input {
        Some(path) => tokio::fs::read_to_string(path).await?,
        None => SAMPLE_TEXT.to_string(),
    };
    let lines: Arc<Vec<String>> = Arc::new(text.lines().map(str::to_string).collect());

    // 1. Stage handlers:
    let handlers = TaskHandlerRegistry::new();
    let split_parallelism = args.split_parallelism as usize;
    handlers.register("split", move |ctx: Arc<TaskContext>| {
        let lines = lines.clone();
        async move {
            let index = ctx.task_group().index as usize;
            for line in lines.iter().skip(index).step_by(split_parallelism) {
                for word in line.split_whitespace() {
                    ctx.emit(Record::new(word.to_lowercase(), 1u64.to_be_bytes().to_vec()));
                }
            }
            Ok(())
        }
    });
    handlers.register("count", |ctx: Arc<TaskContext>| async move {
        let mut counts = BTreeMap::<String, u64>::new();
        for record in ctx.read_all_inputs().await? {
            *counts.entry(record.key.clone()).or_insert(0) += decode_count(&record.value)?;
        }
        for (word, count) in counts {
            ctx.emit(Record::new(word, count.to_be_bytes().to_vec()));
        }
        Ok::<(), anyhow::Error>(())
    });

    // 2. Cluster:
    let cluster = LocalCluster::start(config.clone(), handlers, args.executors).await?;

    // 3. HTTP surface:
    let app = router(cluster.master().clone());
    let listener = tokio::net::TcpListener::bind(args.http).await?;
    tracing::info!("HTTP server listening on {}", args.http);
    let http = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("HTTP server stopped: {}", e);
        }
    });

    // 4. Job:
    let mut builder = PhysicalPlan::builder();
    let split = builder.stage("split", args.split_parallelism, &[]);
    let count = builder.stage("count", args.count_parallelism, &[split]);
    let plan = builder.build(config.scheduler.hash_range_multiplier)?;

    let handle = cluster.submit(plan)?;
    let plan = handle.plan().clone();
    tracing::info!("Job {} submitted", handle.job_id());

    match handle.join().await? {
        JobOutcome::Completed => {
            let records = cluster.master().read_stage_output(&plan, count).await?;
            let mut counts = records
                .iter()
                .map(|record| -> anyhow::Result<(&str, u64)> {
                    Ok((record.key.as_str(), decode_count(&record.value)?))
                })
                .collect::<anyhow::Result<Vec<(&str, u64)>>>()?;
            counts.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(b.0)));

            tracing::info!("Job completed: {} distinct words", counts.len());
            for (word, count) in counts.iter().take(20) {
                tracing::info!("  {:>6}  {}", count, word);
            }
        }
        JobOutcome::Failed(failure) => {
            tracing::error!("Job failed: {}", failure);
        }
        JobOutcome::Cancelled => {
            tracing::warn!("Job cancelled");
        }
    }

    if args.serve {
        tracing::info!("Press Ctrl+C to shutdown");
        tokio::signal::ctrl_c().await?;
    }

    http.abort();
    cluster.shutdown().await;
    Ok(())
}

fn decode_count(value: &[u8]) -> anyhow::Result<u64> {
    let bytes: [u8; 8] = value
        .try_into()
        .map_err(|_| anyhow::anyhow!("count value has {} bytes, expected 8", value.len()))?;
    Ok(u64::from_be_bytes(bytes))
}
