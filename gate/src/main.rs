//! Canopy Gateway
//!
//! This binary runs on the control-plane server and exposes:
//! 1. The admin API (CA, organizations, hosts, invites)
//! 2. The enrollment endpoint remote peers redeem invites against
//!
//! Usage:
//!   canopy-gate --data-dir ./data --admin-token <secret>
//!
//! State (CA key, organizations, hosts, invites) is persisted as JSON
//! under the data directory; everything else is derived.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use canopy_ca::CertificateAuthority;
use canopy_gate::{build_router, AppState};
use canopy_invites::InviteService;
use canopy_registry::{
    GatewaySettings, HostRegistry, OrganizationRegistry, Subnet, DEFAULT_ULA_PREFIX,
};
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "canopy-gate")]
#[command(about = "Canopy mesh admin and enrollment gateway")]
struct Args {
    /// Address to serve the HTTP API on
    #[arg(short, long, default_value = "127.0.0.1:8680")]
    listen: SocketAddr,

    /// Directory for persisted control-plane state
    #[arg(short, long, default_value = "./data")]
    data_dir: PathBuf,

    /// Bearer token required on every admin route
    #[arg(long, env = "CANOPY_ADMIN_TOKEN")]
    admin_token: String,

    /// ULA block the deployment allocates organization subnets from
    #[arg(long, default_value = DEFAULT_ULA_PREFIX)]
    ula_prefix: String,

    /// Public host:port of the rendezvous gateway, wired into generated
    /// host configs when set
    #[arg(long)]
    public_endpoint: Option<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let log_level = if args.verbose { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .compact()
        .init();

    info!("Canopy gateway starting...");

    let base: Subnet = args
        .ula_prefix
        .parse()
        .context("invalid --ula-prefix block")?;

    let ca = Arc::new(
        CertificateAuthority::open(&args.data_dir).context("failed to open CA state")?,
    );
    let orgs = Arc::new(
        OrganizationRegistry::open(base, &args.data_dir)
            .context("failed to open organization registry")?,
    );
    let hosts = Arc::new(
        HostRegistry::open(Arc::clone(&orgs), Arc::clone(&ca), &args.data_dir)
            .context("failed to open host registry")?,
    );
    let invites = Arc::new(
        InviteService::open(Arc::clone(&hosts), &args.data_dir)
            .context("failed to open invite store")?,
    );

    let gateway = GatewaySettings {
        mesh_address: orgs.allocator().gateway_address(),
        public_endpoint: args.public_endpoint.clone(),
    };

    let ca_status = ca.status();
    let state = AppState::new(ca, orgs, hosts, invites, gateway.clone(), args.admin_token);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("failed to bind {}", args.listen))?;

    println!("\n========================================");
    println!("  Canopy Gateway Running");
    println!("========================================");
    println!("  Listen:    {}", args.listen);
    println!("  Data dir:  {}", args.data_dir.display());
    println!("  Mesh GW:   {}", gateway.mesh_address);
    if let Some(endpoint) = &gateway.public_endpoint {
        println!("  Public:    {endpoint}");
    }
    if !ca_status.exists {
        println!("\n  No CA yet: POST /api/ca to create one");
    }
    println!("========================================\n");

    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}
