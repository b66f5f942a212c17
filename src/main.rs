//! kab - Kubernetes application bundle installer

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use kube::CustomResourceExt;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kab::config::{
    InstallerConfig, DEFAULT_BASE_DIR, DEFAULT_MANIFEST_FILE, DEFAULT_RELOCATION_MAPPING,
};
use kab::crd::Manifest;
use kab::fetch::{LocatorReader, DEFAULT_FETCH_TIMEOUT};
use kab::install::Installer;
use kab::kube_client::{create_client, ClusterClient, KubeClusterClient};
use kab::kubectl::KubectlCli;
use kab::patch::{resolve_node_port, KustomizeLabeler, ManifestPatcher};
use kab::readiness::ClusterReadiness;
use kab::relocate::{CraneRegistry, RelocationEngine};
use kab::resource::ResourceManager;
use kab::uninstall::Uninstaller;

/// kab - install and uninstall Kubernetes application bundles
#[derive(Parser, Debug)]
#[command(name = "kab", version, about, long_about = None)]
struct Cli {
    /// Generate the Manifest CRD and exit
    #[arg(long)]
    crd: bool,

    /// Bundle action to perform
    #[arg(long, env = "CNAB_ACTION", value_enum, default_value = "install")]
    action: Action,

    /// Path to the manifest file
    #[arg(
        short = 'f',
        long = "manifest",
        env = "MANIFEST_FILE",
        default_value = DEFAULT_MANIFEST_FILE
    )]
    manifest_file: PathBuf,

    /// Installation name; labels every installed object
    #[arg(long, env = "CNAB_INSTALLATION_NAME")]
    installation_name: Option<String>,

    /// Expose LoadBalancer services as NodePort
    #[arg(long, env = "NODE_PORT")]
    node_port: Option<String>,

    /// Registry to relocate images to
    #[arg(long, env = "TARGET_REGISTRY")]
    target_registry: Option<String>,

    /// Directory that relative resource paths resolve against
    #[arg(long, default_value = DEFAULT_BASE_DIR)]
    base_dir: PathBuf,

    /// Image relocation mapping applied when no target registry is given
    #[arg(long, default_value = DEFAULT_RELOCATION_MAPPING)]
    relocation_mapping: PathBuf,

    /// Path to a kubeconfig; inferred when omitted
    #[arg(long)]
    kubeconfig: Option<PathBuf>,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Install,
    Uninstall,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let cli = Cli::parse();

    if cli.crd {
        let crd = serde_yaml::to_string(&Manifest::crd())
            .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?;
        println!("{crd}");
        return Ok(());
    }

    let client = create_client(cli.kubeconfig.as_deref()).await?;
    let cluster: Arc<dyn ClusterClient> = Arc::new(KubeClusterClient::new(client));
    let kubectl = match &cli.kubeconfig {
        Some(path) => KubectlCli::with_kubeconfig(path),
        None => KubectlCli::new(),
    };

    match cli.action {
        Action::Install => run_install(cli, cluster, kubectl).await,
        Action::Uninstall => run_uninstall(cli, cluster, kubectl).await,
    }
}

/// Patch, relocate and install the manifest
async fn run_install(
    cli: Cli,
    cluster: Arc<dyn ClusterClient>,
    kubectl: KubectlCli,
) -> anyhow::Result<()> {
    let node_port = resolve_node_port(cli.node_port.as_deref(), cluster.as_ref()).await?;

    let config = InstallerConfig {
        installation_name: cli.installation_name,
        node_port,
        target_registry: cli.target_registry,
        base_dir: cli.base_dir,
        relocation_mapping: cli.relocation_mapping,
        ..Default::default()
    };

    let mut manifest = Manifest::from_path(&cli.manifest_file).await?;
    info!(manifest = %cli.manifest_file.display(), "Installing bundle");

    let reader = Arc::new(LocatorReader::new(DEFAULT_FETCH_TIMEOUT)?);
    let resources = ResourceManager::new(
        Arc::new(kubectl.clone()),
        Arc::new(ClusterReadiness::new(cluster.clone())),
        reader.clone(),
        config.base_dir.clone(),
    )
    .with_backoff(config.backoff.clone(), config.check_backoff.clone());
    let patcher = ManifestPatcher::new(
        config.patch_config(),
        Arc::new(KustomizeLabeler::new(kubectl)),
        reader.clone(),
        config.base_dir.clone(),
    );
    let relocation = RelocationEngine::new(
        Arc::new(CraneRegistry::new()),
        reader,
        config.base_dir.clone(),
    );

    let target_registry = config.target_registry().map(str::to_string);
    let installer = Installer::new(config, cluster, resources, patcher, relocation);
    installer.run(&mut manifest, target_registry.as_deref()).await?;

    info!("Kubernetes application bundle installed");
    Ok(())
}

/// Remove the named installation
async fn run_uninstall(
    cli: Cli,
    cluster: Arc<dyn ClusterClient>,
    kubectl: KubectlCli,
) -> anyhow::Result<()> {
    let name = cli
        .installation_name
        .filter(|n| !n.is_empty())
        .ok_or_else(|| anyhow::anyhow!("CNAB_INSTALLATION_NAME is required to uninstall"))?;

    Uninstaller::new(cluster, Arc::new(kubectl)).uninstall(&name).await?;

    info!(name = %name, "Kubernetes application bundle uninstalled");
    Ok(())
}
