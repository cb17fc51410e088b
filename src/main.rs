use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use kafka_smoke::config::ExportConfig;
use kafka_smoke::kafka::{
    is_internal_topic, ClusterAdmin, CreateOutcome, DeleteOutcome, MessageConsumer,
    MessageProducer, TopicAdmin, TopicSpec,
};
use kafka_smoke::provision::{ensure_topics, prepare_topic, TopicTemplate};
use kafka_smoke::secrets::{ArtifactStatus, KubectlBackend, SecretExporter};
use kafka_smoke::smoke::{probe, run_smoke_test};
use kafka_smoke::{Config, TlsContext};
use std::collections::BTreeSet;
use std::io::{BufRead, Write};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

#[derive(Parser, Debug)]
#[command(name = "kafka-smoke")]
#[command(about = "Smoke-test and bootstrap tooling for mutual-TLS Kafka clusters", long_about = None)]
struct Args {
    #[arg(short, long, value_name = "FILE", default_value = "kafka-smoke.toml")]
    config: PathBuf,

    #[arg(short, long, help = "Enable JSON output for logs")]
    json_logs: bool,

    #[arg(short, long, help = "Verbose logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Manage topics
    #[command(subcommand)]
    Topics(TopicsCommand),

    /// Send numbered test messages, one acknowledgement at a time
    Produce {
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        count: Option<u32>,
        #[arg(long)]
        interval_ms: Option<u64>,
    },

    /// Log every record on a topic until interrupted
    Consume {
        #[arg(long)]
        topic: Option<String>,
    },

    /// Ensure the required topics, send one sample to each, verify them
    Smoke,

    /// Check plaintext and TLS connectivity
    Probe,

    /// Export certificates from cluster secrets to local files
    ExportCerts {
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long, help = "Exit non-zero if any artifact failed")]
        strict: bool,
    },
}

#[derive(Subcommand, Debug)]
enum TopicsCommand {
    /// List topics
    List {
        #[arg(long, help = "Include internal topics")]
        all: bool,
    },

    /// Show a topic's partitions and configuration
    Describe {
        #[arg(long)]
        topic: String,
    },

    /// Create a topic
    Create {
        #[arg(long)]
        topic: String,
        #[arg(long)]
        partitions: Option<i32>,
        #[arg(long)]
        replication_factor: Option<i32>,
    },

    /// Delete a topic
    Delete {
        #[arg(long)]
        topic: String,
        #[arg(long, help = "Skip the confirmation prompt")]
        yes: bool,
    },

    /// Create whichever required topics are missing
    Ensure,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(args.json_logs, args.verbose);

    info!("Loading configuration from {:?}", args.config);
    let config = Config::from_file(&args.config)
        .with_context(|| format!("failed to load configuration from {:?}", args.config))?;
    config.validate()?;

    info!(
        brokers = ?config.cluster.brokers,
        tls = config.tls.is_some(),
        "Configuration summary"
    );

    let tls = match args.command {
        Command::ExportCerts { .. } => None,
        _ => load_tls(&config)?,
    };

    run(args.command, &config, tls.as_ref()).await
}

fn load_tls(config: &Config) -> anyhow::Result<Option<TlsContext>> {
    match &config.tls {
        Some(paths) => Ok(Some(
            TlsContext::load(paths).context("TLS credentials are not usable")?,
        )),
        None => {
            warn!("No [tls] section configured, connecting without TLS");
            Ok(None)
        }
    }
}

async fn run(
    command: Command,
    config: &Config,
    tls: Option<&TlsContext>,
) -> anyhow::Result<()> {
    match command {
        Command::Topics(topics) => run_topics_command(topics, config, tls).await,

        Command::Produce {
            topic,
            count,
            interval_ms,
        } => {
            let topic = topic.unwrap_or_else(|| config.producer.topic.clone());
            let count = count.unwrap_or(config.producer.message_count);
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or_else(|| config.producer.send_interval());

            prepare_test_topic(config, tls, &topic).await?;

            let producer = MessageProducer::new(&config.cluster, tls, &config.producer)?;
            let report = producer
                .send_test_messages(&topic, count, &config.producer.message_prefix, interval, ctrl_c())
                .await;
            producer.close()?;

            info!("Sent {}/{} message(s) to {}", report.sent, count, topic);
            if report.sent == 0 && count > 0 && !report.interrupted {
                bail!("no message was acknowledged by the cluster");
            }
            Ok(())
        }

        Command::Consume { topic } => {
            let topic = topic.unwrap_or_else(|| config.consumer.topic.clone());

            prepare_test_topic(config, tls, &topic).await?;

            let consumer = MessageConsumer::new(&config.cluster, tls, &config.consumer)?;
            consumer.subscribe(&[topic.as_str()])?;
            info!(
                "Listening on '{}' via {}",
                topic,
                config.cluster.bootstrap_servers()
            );

            let count = consumer.run(ctrl_c()).await.context("consumer failed")?;
            info!("Consumed {} record(s)", count);
            Ok(())
        }

        Command::Smoke => {
            let report = run_smoke_test(config, tls).await?;

            info!(
                sent = report.sent.len(),
                send_failed = report.send_failed.len(),
                verified = report.verified.len(),
                "Smoke test summary"
            );
            if !report.is_success() {
                bail!("smoke test failed: {:?}", report);
            }
            Ok(())
        }

        Command::Probe => {
            let results = probe(config, tls).await;
            if results.iter().all(|r| r.outcome.is_err()) {
                bail!("no connection mode succeeded");
            }
            Ok(())
        }

        Command::ExportCerts { output_dir, strict } => {
            export_certs(config.export.clone(), output_dir, strict).await
        }
    }
}

async fn run_topics_command(
    command: TopicsCommand,
    config: &Config,
    tls: Option<&TlsContext>,
) -> anyhow::Result<()> {
    let admin = ClusterAdmin::new(&config.cluster, tls)?;

    match command {
        TopicsCommand::List { all } => {
            let topics = admin.list_topics().await?;
            for topic in topics.iter().filter(|t| all || !is_internal_topic(t)) {
                println!("{}", topic);
            }
        }

        TopicsCommand::Describe { topic } => {
            let description = admin.describe_topic(&topic).await?;
            println!(
                "{}: partitions={} replication_factor={}",
                topic, description.partitions, description.replication_factor
            );

            match admin.describe_topic_config(&topic).await {
                Ok(configs) => {
                    for (key, value) in configs {
                        println!("  {} = {}", key, value);
                    }
                }
                Err(e) => warn!("Failed to fetch topic configuration: {}", e),
            }
        }

        TopicsCommand::Create {
            topic,
            partitions,
            replication_factor,
        } => {
            let mut spec = TopicTemplate::from(&config.topics).spec_for(&topic);
            spec.partitions = partitions.unwrap_or(spec.partitions);
            spec.replication_factor = replication_factor.unwrap_or(spec.replication_factor);

            match admin.create_topic(&spec).await? {
                CreateOutcome::Created => println!("Topic '{}' created", topic),
                CreateOutcome::AlreadyExists => {
                    println!("Topic '{}' already exists", topic);
                    report_existing_config(&admin, &spec).await;
                }
            }
        }

        TopicsCommand::Delete { topic, yes } => {
            if !yes && !confirm(&format!("Delete topic '{}'? (yes/N): ", topic))? {
                println!("Deletion cancelled");
                return Ok(());
            }

            match admin.delete_topic(&topic).await? {
                DeleteOutcome::Deleted => println!("Deletion of '{}' requested", topic),
                DeleteOutcome::NotFound => println!("Topic '{}' does not exist", topic),
            }
        }

        TopicsCommand::Ensure => {
            let required: BTreeSet<String> = config.topics.required.iter().cloned().collect();
            let report =
                ensure_topics(&admin, &required, &TopicTemplate::from(&config.topics)).await?;

            for (topic, status) in &report.topics {
                println!("{}: {}", topic, status);
            }
            if !report.is_success() {
                bail!("failed to create: {:?}", report.failed().collect::<Vec<_>>());
            }
        }
    }

    Ok(())
}

/// Creates the topic `produce` or `consume` is about to use if it is missing.
async fn prepare_test_topic(
    config: &Config,
    tls: Option<&TlsContext>,
    topic: &str,
) -> anyhow::Result<()> {
    let admin = ClusterAdmin::new(&config.cluster, tls)?;
    let spec = TopicTemplate::from(&config.topics.test_topic).spec_for(topic);

    prepare_topic(&admin, &spec)
        .await
        .with_context(|| format!("failed to set up topic '{}'", topic))?;
    Ok(())
}

/// Logs the existing topic's shape and configuration when a create turned
/// out to be a no-op, so a mismatch with the request is visible.
async fn report_existing_config(admin: &ClusterAdmin, spec: &TopicSpec) {
    if let Ok(description) = admin.describe_topic(&spec.name).await {
        if description.partitions as i32 != spec.partitions
            || description.replication_factor as i32 != spec.replication_factor
        {
            warn!(
                "Existing topic '{}' has {} partition(s) and replication factor {}, requested {} and {}",
                spec.name,
                description.partitions,
                description.replication_factor,
                spec.partitions,
                spec.replication_factor
            );
        }
    }

    match admin.describe_topic_config(&spec.name).await {
        Ok(configs) => info!("Topic configuration: {:?}", configs),
        Err(e) => warn!("Failed to fetch topic configuration: {}", e),
    }
}

async fn export_certs(
    mut export: ExportConfig,
    output_dir: Option<PathBuf>,
    strict: bool,
) -> anyhow::Result<()> {
    if let Some(dir) = output_dir {
        export.output_dir = dir;
    }

    let backend = KubectlBackend::from_config(&export);
    let summary = SecretExporter::new(backend, export.clone()).export_all().await;

    for outcome in &summary.outcomes {
        match &outcome.status {
            ArtifactStatus::Ok => println!("ok      {:<9} {}", outcome.kind, outcome.name),
            ArtifactStatus::Failed(reason) => {
                println!("FAILED  {:<9} {} ({})", outcome.kind, outcome.name, reason)
            }
        }
    }
    println!("PEM certificates: {}", export.pem_dir().display());
    println!("JKS keystores:    {}", export.jks_dir().display());

    let failures = summary.failures().len();
    if strict && failures > 0 {
        bail!("{} export step(s) failed", failures);
    }
    Ok(())
}

fn confirm(prompt: &str) -> anyhow::Result<bool> {
    print!("{}", prompt);
    std::io::stdout().flush()?;

    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}

async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
}

fn init_logging(json: bool, verbose: bool) {
    let env_filter = if verbose {
        EnvFilter::new("kafka_smoke=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kafka_smoke=info,warn"))
    };

    let fmt_layer = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_span_list(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
