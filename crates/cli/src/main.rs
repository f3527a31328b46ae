use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use vigil_controller::{Controller, Settings};
use vigil_core::{Config, ConfigEvent, ConfigMeta, ConfigStore, EventKind, GroupVersionKind, PatchFn};
use vigil_store::MemoryStore;

mod script;

use script::{Op, Script};

#[derive(Parser, Debug)]
#[command(name = "vigilctl", version, about = "Vigil CLI: replay config mutations and watch their events")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a script's operations through a controller and print results and events
    Replay {
        /// Path to the YAML script
        script: String,
        /// Deliver events inline instead of through the queue (also VIGIL_SYNC_DISPATCH)
        #[arg(long = "sync", action = ArgAction::SetTrue)]
        sync: bool,
        /// Comma-separated namespaces visible to reads (overrides VIGIL_NAMESPACES)
        #[arg(long = "namespaces", value_delimiter = ',')]
        namespaces: Option<Vec<String>>,
        /// Seconds to wait for queued events to drain
        #[arg(long = "drain-secs", default_value_t = 5)]
        drain_secs: u64,
    },
    /// Print the kinds a script declares
    Kinds {
        /// Path to the YAML script
        script: String,
    },
}

/// One line of replay output.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Record<'a> {
    Result { op: &'a str, ok: bool, detail: String },
    Event { event: &'a ConfigEvent },
    Object { object: &'a Config },
}

fn init_tracing() {
    let env = std::env::var("VIGIL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("VIGIL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid VIGIL_METRICS_ADDR; expected host:port");
        }
    }
}

fn emit(output: Output, record: &Record<'_>) {
    match output {
        Output::Json => match serde_json::to_string(record) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "failed to encode record"),
        },
        Output::Human => match record {
            Record::Result { op, ok, detail } => {
                println!("{} {:<13} {}", if *ok { "ok " } else { "err" }, op, detail);
            }
            Record::Event { event } => {
                let sign = match event.kind {
                    EventKind::Add => '+',
                    EventKind::Update => '~',
                    EventKind::Delete => '-',
                };
                let rev = event.new.meta.resource_version.as_deref().unwrap_or("-");
                println!("{} {} {} rev={}", sign, event.gvk(), object_key(&event.new), rev);
            }
            Record::Object { object } => {
                println!("    {} {}", object_key(object), serde_json::to_string(&object.spec).unwrap_or_default());
            }
        },
    }
}

fn object_key(c: &Config) -> String {
    if c.meta.namespace.is_empty() { c.meta.name.clone() } else { format!("{}/{}", c.meta.namespace, c.meta.name) }
}

/// Execute one op. Returns whether it succeeded plus a human-readable detail.
fn execute(controller: &Controller, op: &Op, output: Output) -> Result<(bool, String)> {
    let outcome = match op {
        Op::Create { object } => controller.create(object).map(|rev| format!("{} rev={}", object_key(object), rev)),
        Op::Update { object } => controller.update(object).map(|rev| format!("{} rev={}", object_key(object), rev)),
        Op::UpdateStatus { object } => {
            controller.update_status(object).map(|rev| format!("{} rev={}", object_key(object), rev))
        }
        Op::Patch { kind, name, namespace, patch_type, body } => {
            let gvk = GroupVersionKind::parse(kind)?;
            let (original, patch) = match controller.get(&gvk, name, namespace) {
                Some(original) => match script::patch_fn(*patch_type, body.clone(), &original) {
                    Ok(patch) => (original, patch),
                    Err(e) => return Ok((false, format!("{:#}", e))),
                },
                // A missing object still goes through the controller so the store reports it.
                None => {
                    let typ = *patch_type;
                    let absent = Config::new(ConfigMeta::new(gvk.clone(), name.clone(), namespace.clone()), serde_json::Value::Null);
                    (absent, Arc::new(move |c: Config| (c, typ)) as PatchFn)
                }
            };
            controller.patch(&original, &patch).map(|rev| format!("{} rev={}", object_key(&original), rev))
        }
        Op::Delete { kind, name, namespace, resource_version } => {
            let gvk = GroupVersionKind::parse(kind)?;
            controller.delete(&gvk, name, namespace, resource_version.as_deref()).map(|_| format!("{}/{}", namespace, name))
        }
        Op::Get { kind, name, namespace } => {
            let gvk = GroupVersionKind::parse(kind)?;
            match controller.get(&gvk, name, namespace) {
                Some(object) => {
                    emit(output, &Record::Object { object: &object });
                    Ok(format!("{} found", object_key(&object)))
                }
                None => Ok(format!("{}/{} not found", namespace, name)),
            }
        }
        Op::List { kind, namespace } => {
            let gvk = GroupVersionKind::parse(kind)?;
            let items = controller.list(&gvk, namespace.as_deref());
            for object in &items {
                emit(output, &Record::Object { object });
            }
            Ok(format!("{} item(s)", items.len()))
        }
    };
    Ok(match outcome {
        Ok(detail) => (true, detail),
        Err(e) => (false, e.to_string()),
    })
}

async fn replay(output: Output, path: &str, settings: Settings, drain: Duration) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading script {}", path))?;
    let script = Script::parse(&raw)?;
    let store = Arc::new(MemoryStore::new(script.schemas()));
    let controller = Arc::new(Controller::from_settings(store, &settings));
    info!(kinds = script.schemas.len(), ops = script.ops.len(), sync = settings.sync_dispatch, "replay start");

    let delivered = Arc::new(AtomicU64::new(0));
    for gvk in script.schemas().kinds() {
        let delivered = Arc::clone(&delivered);
        controller.register_event_handler(
            gvk.clone(),
            Arc::new(move |event: &ConfigEvent| {
                emit(output, &Record::Event { event });
                delivered.fetch_add(1, Ordering::SeqCst);
            }),
        );
    }
    let done = Arc::new(AtomicBool::new(false));
    controller.register_has_synced_handler({
        let done = Arc::clone(&done);
        move || done.load(Ordering::SeqCst)
    });

    let stop = CancellationToken::new();
    let runner = tokio::spawn({
        let controller = Arc::clone(&controller);
        let stop = stop.clone();
        async move { controller.run(stop).await }
    });

    let mut expected = 0u64;
    for op in &script.ops {
        let (ok, detail) = execute(&controller, op, output)?;
        if ok && op.is_mutation() {
            expected += 1;
        }
        emit(output, &Record::Result { op: op.name(), ok, detail });
    }
    done.store(true, Ordering::SeqCst);

    let deadline = Instant::now() + drain;
    while delivered.load(Ordering::SeqCst) < expected && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let got = delivered.load(Ordering::SeqCst);
    if got < expected {
        warn!(expected, delivered = got, "not all events delivered before drain deadline");
    }
    stop.cancel();
    runner.await.context("joining dispatch loop")?;
    info!(events = got, synced = controller.has_synced(), "replay done");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match cli.command {
        Commands::Replay { script, sync, namespaces, drain_secs } => {
            let settings = Settings::from_env().with_overrides(sync, namespaces);
            tokio::select! {
                res = replay(cli.output, &script, settings, Duration::from_secs(drain_secs)) => res?,
                _ = tokio::signal::ctrl_c() => info!("Ctrl-C received; aborting replay"),
            }
        }
        Commands::Kinds { script } => {
            let raw = std::fs::read_to_string(&script).with_context(|| format!("reading script {}", script))?;
            let parsed = Script::parse(&raw)?;
            match cli.output {
                Output::Human => {
                    for s in parsed.schemas().iter() {
                        let scope = if s.namespaced { "namespaced" } else { "cluster" };
                        println!("{} • {}", s.gvk, scope);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&parsed.schemas())?),
            }
        }
    }
    Ok(())
}
