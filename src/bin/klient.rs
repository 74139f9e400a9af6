use std::{
    fs::File,
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Mutex,
    time::Duration,
};

use chrono::{DateTime, Utc};
use clap::{error::ErrorKind as UsageError, ArgGroup, CommandFactory, Parser};
use klient::{present, prelude::*};
use tokio::io::BufReader;
use tracing_subscriber::EnvFilter;

/// Operator tool for Kafka and Redpanda clusters.
#[derive(Debug, Parser)]
#[command(name = "klient", disable_version_flag = true)]
#[command(group(
    ArgGroup::new("mode")
        .required(true)
        .multiple(false)
        .args([
            "version",
            "describe",
            "create",
            "delete",
            "write",
            "write_record",
            "range_read",
            "time_read",
            "group_read",
            "exclusive_read",
        ])
))]
struct Cli {
    /// Comma separated list of host:port bootstrap addresses
    #[arg(long, env = "KLIENT_BOOTSTRAPPERS", default_value = "localhost:9092")]
    bootstrappers: String,
    /// API key or username. Enables SASL
    #[arg(long, env = "KLIENT_AUTHKEY", default_value = "")]
    authkey: String,
    /// API secret or password
    #[arg(long, env = "KLIENT_AUTHSECRET", default_value = "", hide_env_values = true)]
    authsecret: String,
    /// Connect with TLS
    #[arg(long)]
    tls: bool,
    /// Skip verification of the broker's certificate
    #[arg(long = "tlsnoverify")]
    tls_no_verify: bool,
    /// PEM file of CA certificates to trust instead of the bundled roots
    #[arg(long)]
    tls_ca: Option<PathBuf>,
    /// PEM client certificate
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,
    /// PEM client private key
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
    /// Authenticate with SCRAM instead of PLAIN
    #[arg(long)]
    scram: bool,
    /// Dial timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout: u64,

    /// Print the version
    #[arg(long)]
    version: bool,
    /// Describe brokers, topics and partitions
    #[arg(long)]
    describe: bool,
    /// Create a topic
    #[arg(long, value_name = "TOPIC")]
    create: Option<String>,
    /// Partitions of a created topic
    #[arg(long, default_value_t = 6)]
    partitions: i32,
    /// Replication factor of a created topic
    #[arg(long, default_value_t = 3)]
    replicas: i16,
    /// Delete a topic
    #[arg(long, value_name = "TOPIC")]
    delete: Option<String>,
    /// Write delimited input to a topic
    #[arg(long, value_name = "TOPIC")]
    write: Option<String>,
    /// Each value is followed by a key
    #[arg(long)]
    keyed: bool,
    /// Write a single record with headers to a topic
    #[arg(long, value_name = "TOPIC")]
    write_record: Option<String>,
    /// Key of the single record
    #[arg(long, default_value = "")]
    key: String,
    /// Value of the single record
    #[arg(long, default_value = "")]
    value: String,
    /// Headers of the single record, as key=value[,key=value...]
    #[arg(long)]
    headers: Option<String>,
    /// Read a partition by offset range
    #[arg(long, value_name = "TOPIC")]
    range_read: Option<String>,
    /// First offset to read. 0 reads from the earliest offset
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    offset_from: i64,
    /// Last offset to read. -1 reads until interrupted
    #[arg(long, default_value_t = -1, allow_negative_numbers = true)]
    offset_to: i64,
    /// Partition to read
    #[arg(long, default_value_t = 0)]
    partition: i32,
    /// Read a partition by time range
    #[arg(long, value_name = "TOPIC")]
    time_read: Option<String>,
    /// Start of the time range, DD-MM-YYYY HH:MM:SS UTC. Defaults to a minute ago
    #[arg(long, value_parser = config::parse_time)]
    time_from: Option<DateTime<Utc>>,
    /// End of the time range, DD-MM-YYYY HH:MM:SS UTC. Reads until interrupted when unset
    #[arg(long, value_parser = config::parse_time)]
    time_to: Option<DateTime<Utc>>,
    /// Read a topic as a member of a consumer group
    #[arg(long, value_name = "TOPIC", requires = "group")]
    group_read: Option<String>,
    /// Consumer group of a group read
    #[arg(long)]
    group: Option<String>,
    /// Read a whole topic as the only member of a new consumer group
    #[arg(long, value_name = "TOPIC")]
    exclusive_read: Option<String>,

    /// Plain output for pipes: no prompts, banners or decoration
    #[arg(long)]
    unattended: bool,
    /// Single byte separating values in unattended input and output
    #[arg(long, default_value = "\\n", value_parser = config::parse_delimiter)]
    delimiter: u8,
    /// Log file
    #[arg(long, default_value = "klient.log")]
    log: PathBuf,
}

impl Cli {
    fn connect_config(&self) -> ConnectConfig {
        ConnectConfig {
            api_key: self.authkey.clone(),
            api_secret: self.authsecret.clone(),
            tls: self.tls,
            skip_tls_verify: self.tls_no_verify,
            scram: self.scram,
            timeout: Duration::from_millis(self.timeout),
            tls_ca: self.tls_ca.clone(),
            tls_cert: self.tls_cert.clone(),
            tls_key: self.tls_key.clone(),
            ..Default::default()
        }
    }

    fn attended(&self) -> bool {
        !self.unattended
    }

    /// What the failure message printed to an attended terminal should say.
    fn failure_message(&self, err: &Error) -> String {
        if let Some(topic) = &self.create {
            format!("unable to create topic '{topic}'. see log for details")
        } else if let Some(topic) = &self.delete {
            format!("unable to delete topic '{topic}'. see log for details")
        } else {
            format!("error: {err}. see log for details")
        }
    }
}

fn init_logging(path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .compact()
        // Display source code file paths
        .with_file(true)
        // Display source code line numbers
        .with_line_number(true)
        // Display the thread ID an event was recorded on
        .with_thread_ids(true)
        // Don't display the event's target (module path)
        .with_target(false)
        .init();
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.version {
        println!("klient version {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let bootstrap = config::parse_bootstrappers(&cli.bootstrappers)
        .unwrap_or_else(|err| Cli::command().error(UsageError::InvalidValue, err).exit());
    let headers = config::parse_headers(cli.headers.as_deref().unwrap_or_default())
        .unwrap_or_else(|err| Cli::command().error(UsageError::InvalidValue, err).exit());

    if let Err(err) = init_logging(&cli.log) {
        eprintln!("unable to open log file '{}': {}", cli.log.display(), err);
        return ExitCode::FAILURE;
    }
    tracing::info!("starting with bootstrappers {}", cli.bootstrappers);
    tracing::debug!("connection settings {:?}", cli.connect_config());

    let code = match run(&cli, bootstrap, headers).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!("{}", err);
            if cli.attended() {
                println!("{}", cli.failure_message(&err));
            }
            ExitCode::FAILURE
        }
    };

    tracing::info!("terminated");
    code
}

async fn run(cli: &Cli, bootstrap: Vec<Endpoint>, headers: Headers) -> Result<ExitCode> {
    let client = SamsaClient::new(cli.connect_config());
    let mut session = Session::open(client, bootstrap).await?;
    tracing::info!("connected to controller {}", session.controller());

    let outcome = dispatch(cli, &mut session, headers).await;
    session.close().await;
    outcome
}

async fn dispatch(
    cli: &Cli,
    session: &mut Session<SamsaClient>,
    headers: Headers,
) -> Result<ExitCode> {
    let stdout = io::stdout();

    if cli.describe {
        let brokers = session.describe().await?;
        let mut out = stdout.lock();
        present::write_describe(&mut out, session.bootstrap(), &brokers, cli.unattended)?;
        if cli.attended() {
            let topics = session.topics().await?;
            writeln!(out)?;
            present::write_topics(&mut out, &topics)?;
        }
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(topic) = &cli.create {
        session
            .create_topic(topic, cli.partitions, cli.replicas)
            .await?;
        print!("{}", present::topic_changed(TopicOperation::Create, topic));
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(topic) = &cli.delete {
        session.delete_topic(topic).await?;
        print!("{}", present::topic_changed(TopicOperation::Delete, topic));
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(topic) = &cli.write {
        let options = ProduceOptions {
            topic: topic.clone(),
            keyed: cli.keyed,
            mode: if cli.unattended {
                Mode::Unattended
            } else {
                Mode::Attended
            },
            delimiter: cli.delimiter,
        };
        let input = BufReader::new(tokio::io::stdin());
        let mut prompter = present::TerminalPrompter::new(stdout);
        let summary = session.produce(input, &options, &mut prompter).await?;
        if summary.failed {
            return Ok(ExitCode::FAILURE);
        }
        return Ok(ExitCode::SUCCESS);
    }

    if let Some(topic) = &cli.write_record {
        session
            .write_record(topic, cli.key.clone(), cli.value.clone(), headers)
            .await?;
        if cli.attended() {
            println!("wrote [{} > {}]", cli.value, topic);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let (topic, strategy) = read_strategy(cli)?;
    read(cli, session, topic, strategy).await?;
    Ok(ExitCode::SUCCESS)
}

fn read_strategy(cli: &Cli) -> Result<(&str, ReadStrategy)> {
    if let Some(topic) = &cli.range_read {
        let to = (cli.offset_to >= 0).then_some(cli.offset_to);
        return Ok((
            topic,
            ReadStrategy::OffsetRange {
                partition: cli.partition,
                from: cli.offset_from,
                to,
            },
        ));
    }

    if let Some(topic) = &cli.time_read {
        let from = cli
            .time_from
            .unwrap_or_else(|| Utc::now() - chrono::Duration::minutes(1));
        return Ok((
            topic,
            ReadStrategy::TimeRange {
                partition: cli.partition,
                from,
                to: cli.time_to,
            },
        ));
    }

    if let Some(topic) = &cli.group_read {
        let group = cli.group.clone().unwrap_or_default();
        return Ok((topic, ReadStrategy::Group { group }));
    }

    match &cli.exclusive_read {
        Some(topic) => Ok((topic, ReadStrategy::Exclusive)),
        None => Err(Error::InvalidArgument("no mode selected".to_owned())),
    }
}

async fn read(
    cli: &Cli,
    session: &Session<SamsaClient>,
    topic: &str,
    strategy: ReadStrategy,
) -> Result<()> {
    let read = session.open_read(topic, strategy.clone()).await?;
    if cli.attended() {
        print!("{}", present::read_banner(topic, &strategy, read.group()));
    }

    let stdout = io::stdout();
    let unattended = cli.unattended;
    let delimiter = cli.delimiter;
    let print = move |message: Message| {
        let mut out = stdout.lock();
        match present::write_message(&mut out, &message, unattended, delimiter)
            .and_then(|_| out.flush())
        {
            Ok(()) => true,
            Err(err) => {
                tracing::warn!("Stopping read, unable to write to stdout: {}", err);
                false
            }
        }
    };

    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!("unable to listen for interrupts: {}", err);
            std::future::pending::<()>().await;
        }
    };
    let delivered = read.read_until(interrupt, print).await?;
    tracing::info!("read {} messages from topic '{}'", delivered, topic);
    Ok(())
}
