use std::net::SocketAddr;

use is_terminal::IsTerminal;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::ConfigMap;
use kroxide_types::{Composition, EnhancedManifest, Expr, FieldPath, RefView};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use kroxide_engine::*;

fn main() {
    use clap::{crate_authors, crate_description, crate_name, crate_version, Arg, ArgAction, Command};
    use std::process;

    let cmd = Command::new(crate_name!())
        .version(crate_version!())
        .author(crate_authors!())
        .about(crate_description!())
        .subcommand_required(true)
        .subcommands([
            Command::new("deploy")
                .about("apply a composition's resources to the cluster in dependency order")
                .args([
                    Arg::new("spec_file")
                        .long("spec-file")
                        .help("path to a JSON document used as the schema root for reference resolution")
                        .required(true),
                    Arg::new("namespace")
                        .long("namespace")
                        .help("namespace override for namespaced resources lacking one"),
                    Arg::new("introspection_address")
                        .long("introspection-bind-address")
                        .help("address to bind for the HTTP introspection server")
                        .default_value("[::]:8089"),
                    Arg::new("dry_run").long("dry-run").action(ArgAction::SetTrue),
                    Arg::new("rollback_on_failure").long("rollback-on-failure").action(ArgAction::SetTrue),
                ]),
            Command::new("emit").about("render a composition as a ResourceGraphDefinition document"),
            Command::new("validate").about("validate a composition's references without contacting the cluster"),
        ]);

    if let Err(e) = match cmd.get_matches().subcommand() {
        Some(("deploy", m)) => Args::try_from(m).map_err(Error::from).and_then(startup),
        Some(("emit", _)) => emit(),
        Some(("validate", _)) => validate(),
        _ => unreachable!(),
    } {
        eprintln!("{e}");
        process::exit(1);
    }
}

struct Args {
    spec_file: std::path::PathBuf,
    namespace: Option<String>,
    introspection_address: SocketAddr,
    dry_run: bool,
    rollback_on_failure: bool,
}

impl TryFrom<&clap::ArgMatches> for Args {
    type Error = std::net::AddrParseError;

    fn try_from(m: &clap::ArgMatches) -> std::result::Result<Self, Self::Error> {
        Ok(Self {
            spec_file: m.get_one::<String>("spec_file").unwrap().into(),
            namespace: m.get_one::<String>("namespace").cloned(),
            introspection_address: m.get_one::<String>("introspection_address").unwrap().parse()?,
            dry_run: m.get_flag("dry_run"),
            rollback_on_failure: m.get_flag("rollback_on_failure"),
        })
    }
}

/// Demo_composition builds the composition the CLI operates on. The core never implements
/// concrete resource factories itself (§1); this binary stands in for the external composition
/// builder a real deployment would supply, wiring a ConfigMap and a Deployment that reads the
/// ConfigMap's name back out, to exercise the dependency graph end to end.
fn demo_composition() -> kroxide_engine::Result<Composition> {
    let mut cm = ConfigMap::default();
    cm.metadata.name = Some("app-config".to_string());
    let config = EnhancedManifest::new("config", cm).erase()?;

    let mut deployment = Deployment::default();
    deployment.metadata.name = Some("app".to_string());
    let app = EnhancedManifest::new("app", deployment).erase()?;

    let status_expr = Expr::from(RefView::new("app").field("status").field("readyReplicas"));

    Ok(Composition::builder("demo", "kroxide.io/v1alpha1", "Demo")
        .resource(config)?
        .resource(app)?
        .status_field(FieldPath::root().field("readyReplicas"), status_expr)
        .build()?)
}

fn emit() -> kroxide_engine::Result<()> {
    let composition = demo_composition()?;
    let (doc, source_map) = kroxide_templates::emit_rgd(&composition)?;
    for entry in source_map.entries() {
        info!(cel = %entry.cel, context = ?entry.context, class = ?entry.class, "analyzed status expression");
        for diagnostic in &entry.diagnostics {
            info!(message = %diagnostic.message, "expression diagnostic");
        }
    }
    print!("{doc}");
    Ok(())
}

fn validate() -> kroxide_engine::Result<()> {
    let composition = demo_composition()?;
    composition.validate_references()?;
    println!("composition {:?} validated: {} resource(s)", composition.name, composition.resources.len());
    Ok(())
}

fn startup(args: Args) -> kroxide_engine::Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tokio::{runtime, signal};
    use tracing_subscriber::{filter::EnvFilter, prelude::*};

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let collector = tracing_subscriber::Registry::default()
        .with(env_filter)
        .with(if std::io::stdout().is_terminal() {
            Some(tracing_subscriber::fmt::layer())
        } else {
            None
        })
        .with(if std::io::stdout().is_terminal() {
            None
        } else {
            Some(tracing_subscriber::fmt::layer().json())
        });
    tracing::subscriber::set_global_default(collector)?;
    let prom = PrometheusBuilder::new().with_http_listener(args.introspection_address);

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let token = CancellationToken::new();
    rt.handle().spawn(async move {
        if let Err(e) = prom.install() {
            error!("error setting up prometheus endpoint: {e}");
        }
    });
    let ctlstop = token.clone();
    rt.handle().spawn(async move {
        if let Err(err) = signal::ctrl_c().await {
            error!("error reading SIGTERM: {err}");
        }
        ctlstop.cancel();
    });
    rt.block_on(run(args, token))
}

async fn run(args: Args, token: CancellationToken) -> kroxide_engine::Result<()> {
    let composition = demo_composition()?;
    let spec_bytes = tokio::fs::read(&args.spec_file).await?;
    let spec: serde_json::Value = serde_json::from_slice(&spec_bytes)?;

    let ctx = Context::new().await?;
    let options = kroxide_types::DeploymentOptions {
        namespace: args.namespace,
        dry_run: args.dry_run,
        rollback_on_failure: args.rollback_on_failure,
        ..Default::default()
    };

    info!(name = composition.name, "starting deployment");
    let result = tokio::select! {
        res = deploy(&composition, &spec, &ctx, &options, |ev| info!(?ev, "progress")) => res?,
        () = token.cancelled() => {
            info!("deployment cancelled");
            return Ok(());
        }
    };
    info!(status = ?result.status, deployment_id = result.deployment_id, "deployment finished");
    Ok(())
}
