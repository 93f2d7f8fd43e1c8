//! slbnc - Straylight IRC Bouncer

use slbnc::config::{Config, DirStorage, Storage};
use slbnc::network::{Reactor, unix_now};
use slbnc::security::hash_password;
use slbnc::state::{Bouncer, keys};
use tokio::task::LocalSet;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "slbnc.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = slbnc::config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {config_path}", errors.len());
    }

    info!(
        server = %config.server.name,
        pseudo = %config.server.pseudo_nick,
        listen = %config.listen.address,
        "Starting slbnc"
    );

    let storage = DirStorage::open(&config.storage.data_dir)?;
    let has_users = !storage.user_names()?.is_empty();
    let mut bouncer = Bouncer::new(config.server.clone(), Box::new(storage), unix_now())?;

    // First run: create the administrator
    if !has_users {
        match &config.admin {
            Some(admin) => {
                let hash = hash_password(&admin.password)
                    .map_err(|e| anyhow::anyhow!("failed to hash admin password: {e}"))?;
                bouncer.create_user(&admin.name, &hash)?;
                if let Some(user) = bouncer.user_mut(&admin.name) {
                    user.set_setting(keys::ADMIN, Some("1"))?;
                }
                info!(admin = %admin.name, "Created administrator account");
            }
            None => warn!("No users exist and no [admin] is configured; nobody can log in"),
        }
    }

    for module in &config.modules.load {
        if bouncer.load_module(module).is_none() {
            warn!(module = %module, "Unknown module");
        }
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let local = LocalSet::new();

    local.block_on(&runtime, async move {
        let reactor = Reactor::bind(bouncer, config.listen.address).await?;

        let shutdown = reactor.shutdown_token();
        tokio::task::spawn_local(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupt received, shutting down");
                shutdown.cancel();
            }
        });

        reactor.run().await;
        info!("slbnc stopped");
        Ok::<_, anyhow::Error>(())
    })
}
