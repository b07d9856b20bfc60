use chrono::Utc;
use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::net::SocketAddr;
use tonic::transport::Channel;
use tracing_subscriber::EnvFilter;

use task_fabric::config::{CoordinatorConfig, DispatchConfig, PoolConfig, ScannerConfig};
use task_fabric::coordinator::Coordinator;
use task_fabric::proto::coordinator_service_client::CoordinatorServiceClient;
use task_fabric::proto::{
    ClientTaskRequest, RequestTaskRequest, ScheduleTaskRequest, TaskStatus,
    UpdateTaskStatusRequest,
};

#[derive(Parser, Debug)]
#[command(name = "task-fabric")]
#[command(version)]
#[command(about = "A distributed task coordinator with a worker pool and database scanner")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the coordinator
    Coordinator(CoordinatorArgs),

    /// Task management commands
    Task {
        #[command(flatten)]
        client: ClientArgs,

        #[command(subcommand)]
        command: TaskCommands,
    },
}

// =============================================================================
// Coordinator Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct CoordinatorArgs {
    /// Port to listen on for gRPC
    #[arg(long, env = "FABRIC_PORT", default_value = "8080")]
    port: u16,

    /// Postgres connection string. Without it tasks are kept in memory.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Size of the Postgres connection pool
    #[arg(long, default_value = "10")]
    db_max_connections: u32,

    /// Keep tasks in memory even if a database URL is set
    #[arg(long)]
    memory_store: bool,

    /// Interval at which workers send heartbeats, in milliseconds.
    /// The sweep interval must be longer.
    #[arg(long, default_value = "5000")]
    heartbeat_interval_ms: u64,

    /// Sweeps a worker may miss before it is evicted
    #[arg(long, default_value = "1")]
    max_heartbeat_misses: u32,

    /// Period of the eviction sweep in milliseconds
    #[arg(long, default_value = "15000")]
    sweep_interval_ms: u64,

    /// Tasks held in memory before submitters block
    #[arg(long, default_value = "100")]
    queue_capacity: usize,

    /// Failed forwards before a task is dead-lettered (unbounded if unset)
    #[arg(long)]
    max_dispatch_attempts: Option<u32>,

    /// Disable the database scanner
    #[arg(long)]
    no_scanner: bool,

    /// Period of the database scanner in milliseconds
    #[arg(long, default_value = "10000")]
    scan_interval_ms: u64,
}

// =============================================================================
// Client Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct ClientArgs {
    /// Coordinator address
    #[arg(long, short = 'a', default_value = "http://127.0.0.1:8080")]
    addr: String,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

#[derive(Debug, Clone, ValueEnum)]
enum StatusArg {
    Started,
    Complete,
    Failed,
}

// =============================================================================
// Task Commands
// =============================================================================

#[derive(clap::Subcommand, Debug)]
enum TaskCommands {
    /// Queue a task for immediate dispatch
    Submit {
        /// Task payload
        data: String,

        /// Lower values are dispatched first
        #[arg(long, short, default_value = "0", allow_hyphen_values = true)]
        priority: i32,
    },
    /// Persist a task for the database scanner
    Schedule {
        /// Command to run
        command: String,

        /// Seconds from now until the task is due
        #[arg(long, default_value = "0")]
        delay_secs: i64,

        #[arg(long, short, default_value = "0", allow_hyphen_values = true)]
        priority: i32,
    },
    /// Pull the next queued task without waiting
    Pull,
    /// Report a task status transition
    Status {
        task_id: String,

        status: StatusArg,
    },
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct SubmitOutput {
    task_id: String,
    message: String,
}

#[derive(Serialize)]
struct ScheduleOutput {
    task_id: String,
    scheduled_at: i64,
}

#[derive(Serialize)]
struct PullOutput {
    task_id: Option<String>,
    data: Option<String>,
    priority: Option<i32>,
}

#[derive(Serialize)]
struct StatusOutput {
    task_id: String,
    status: String,
    success: bool,
}

// =============================================================================
// Coordinator
// =============================================================================

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}

async fn run_coordinator(args: CoordinatorArgs) -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let listen_addr: SocketAddr = format!("0.0.0.0:{}", args.port).parse()?;

    let mut config = CoordinatorConfig::new(listen_addr)
        .with_pool(PoolConfig {
            heartbeat_interval_ms: args.heartbeat_interval_ms,
            max_heartbeat_misses: args.max_heartbeat_misses,
            sweep_interval_ms: args.sweep_interval_ms,
        })
        .with_dispatch(DispatchConfig {
            queue_capacity: args.queue_capacity,
            max_dispatch_attempts: args.max_dispatch_attempts,
            ..DispatchConfig::default()
        })
        .with_scanner(ScannerConfig {
            enabled: !args.no_scanner,
            scan_interval_ms: args.scan_interval_ms,
            ..ScannerConfig::default()
        });
    config.database_max_connections = args.db_max_connections;
    if let Some(url) = args.database_url.filter(|_| !args.memory_store) {
        config = config.with_database_url(url);
    }

    tracing::info!(
        listen_addr = %config.listen_addr,
        persistent = config.database_url.is_some(),
        "Starting task-fabric coordinator"
    );

    Coordinator::new(config).run().await?;
    Ok(())
}

// =============================================================================
// Client Command Handlers
// =============================================================================

async fn handle_task_submit(
    client: &mut CoordinatorServiceClient<Channel>,
    data: String,
    priority: i32,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let response = match client
        .submit_task(ClientTaskRequest { data, priority })
        .await
    {
        Ok(response) => response.into_inner(),
        Err(status) => {
            eprintln!("Error: Task submission failed: {}", status.message());
            std::process::exit(1);
        }
    };

    match output_format {
        OutputFormat::Json => {
            let output = SubmitOutput {
                task_id: response.task_id,
                message: response.message,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Task submitted successfully!");
            println!("Task ID: {}", response.task_id);
        }
    }
    Ok(())
}

async fn handle_task_schedule(
    client: &mut CoordinatorServiceClient<Channel>,
    command: String,
    delay_secs: i64,
    priority: i32,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduled_at = Utc::now().timestamp() + delay_secs.max(0);
    let response = client
        .schedule_task(ScheduleTaskRequest {
            command,
            scheduled_at,
            priority,
        })
        .await?
        .into_inner();

    match output_format {
        OutputFormat::Json => {
            let output = ScheduleOutput {
                task_id: response.task_id,
                scheduled_at: response.scheduled_at,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            let due = chrono::DateTime::from_timestamp(response.scheduled_at, 0)
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| response.scheduled_at.to_string());
            println!("Task scheduled successfully!");
            println!("Task ID: {}", response.task_id);
            println!("Due:     {}", due);
        }
    }
    Ok(())
}

async fn handle_task_pull(
    client: &mut CoordinatorServiceClient<Channel>,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let task = client
        .request_task(RequestTaskRequest {})
        .await?
        .into_inner()
        .task;

    match output_format {
        OutputFormat::Json => {
            let output = PullOutput {
                task_id: task.as_ref().map(|t| t.task_id.clone()),
                data: task.as_ref().map(|t| t.data.clone()),
                priority: task.as_ref().map(|t| t.priority),
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => match task {
            Some(task) => {
                println!("Task ID:  {}", task.task_id);
                println!("Priority: {}", task.priority);
                println!("Data:     {}", task.data);
            }
            None => println!("No tasks queued."),
        },
    }
    Ok(())
}

async fn handle_task_status(
    client: &mut CoordinatorServiceClient<Channel>,
    task_id: String,
    status: StatusArg,
    output_format: &OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let now = Utc::now().timestamp();
    let (proto_status, name) = match status {
        StatusArg::Started => (TaskStatus::Started, "STARTED"),
        StatusArg::Complete => (TaskStatus::Complete, "COMPLETE"),
        StatusArg::Failed => (TaskStatus::Failed, "FAILED"),
    };
    let mut request = UpdateTaskStatusRequest {
        task_id: task_id.clone(),
        status: proto_status as i32,
        ..Default::default()
    };
    match proto_status {
        TaskStatus::Started => request.started_at = now,
        TaskStatus::Complete => request.completed_at = now,
        _ => request.failed_at = now,
    }

    let success = match client.update_task_status(request).await {
        Ok(response) => response.into_inner().success,
        Err(status) => {
            eprintln!("Error: Status update failed: {}", status.message());
            std::process::exit(1);
        }
    };

    match output_format {
        OutputFormat::Json => {
            let output = StatusOutput {
                task_id,
                status: name.to_string(),
                success,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("Task ID: {}", task_id);
            println!("Status:  {}", name);
        }
    }
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    match args.command {
        Commands::Coordinator(coordinator_args) => {
            run_coordinator(coordinator_args).await?;
        }
        Commands::Task { client, command } => {
            let channel = Channel::from_shared(client.addr.clone())?.connect().await?;
            let mut grpc_client = CoordinatorServiceClient::new(channel);

            match command {
                TaskCommands::Submit { data, priority } => {
                    handle_task_submit(&mut grpc_client, data, priority, &client.output).await?;
                }
                TaskCommands::Schedule {
                    command,
                    delay_secs,
                    priority,
                } => {
                    handle_task_schedule(
                        &mut grpc_client,
                        command,
                        delay_secs,
                        priority,
                        &client.output,
                    )
                    .await?;
                }
                TaskCommands::Pull => {
                    handle_task_pull(&mut grpc_client, &client.output).await?;
                }
                TaskCommands::Status { task_id, status } => {
                    handle_task_status(&mut grpc_client, task_id, status, &client.output).await?;
                }
            }
        }
    }

    Ok(())
}
