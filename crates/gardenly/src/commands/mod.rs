//! Command dispatch: wires config into core collaborators, then runs
//! the selected handler.

pub mod check;
pub mod cloud;
pub mod config_cmd;
pub mod run;
pub mod sync;
pub mod trigger;

use std::path::PathBuf;
use std::sync::Arc;

use gardenly_config::Config;
use gardenly_core::{
    BridgeConfig, CloudApi, CommandBuilder, CommandDispatcher, ConfigDescriptor, MemoryStore,
    PollContext, PollLoop, Session,
};

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Loaded configuration and where it came from.
pub struct Settings {
    pub config: Config,
    pub path: PathBuf,
}

impl Settings {
    pub fn load(global: &GlobalOpts) -> Result<Self, CliError> {
        let path = global
            .config
            .clone()
            .unwrap_or_else(gardenly_config::config_path);
        let config = gardenly_config::load_config_from(&path)?;
        Ok(Self { config, path })
    }

    pub fn descriptor(&self) -> Result<ConfigDescriptor, CliError> {
        let path = gardenly_config::descriptor_path(&self.config, &self.path);
        Ok(gardenly_config::load_descriptor(&self.config, &path)?)
    }
}

/// Core collaborators shared by the cloud-facing commands.
pub struct Bridge {
    pub config: BridgeConfig,
    pub api: Arc<dyn CloudApi>,
    pub session: Arc<Session>,
    pub store: Arc<MemoryStore>,
}

impl Bridge {
    pub fn connect(settings: &Settings) -> Result<Self, CliError> {
        let config = gardenly_config::to_bridge_config(&settings.config)?;
        let api: Arc<dyn CloudApi> = Arc::new(config.build_client()?);
        let session = Arc::new(Session::new(config.username.clone(), config.password.clone()));
        Ok(Self {
            config,
            api,
            session,
            store: Arc::new(MemoryStore::new()),
        })
    }

    /// Log in unless a session is already active.
    pub async fn ensure_session(&self) -> Result<(), CliError> {
        if !self.session.is_active() {
            self.session.login(self.api.as_ref()).await?;
        }
        Ok(())
    }

    pub fn poll_loop(&self, descriptor: ConfigDescriptor) -> PollLoop {
        PollLoop::new(
            self.config.poll,
            PollContext {
                api: Arc::clone(&self.api),
                session: Arc::clone(&self.session),
                store: self.store.clone(),
                descriptor: Arc::new(descriptor),
                smart_mode: self.config.smart_mode,
            },
        )
    }

    pub fn dispatcher(&self) -> CommandDispatcher {
        let builder = CommandBuilder::new(self.store.clone(), self.config.codec.clone());
        CommandDispatcher::new(
            builder,
            self.store.clone(),
            Arc::clone(&self.api),
            Arc::clone(&self.session),
        )
    }
}

/// Dispatch a cloud-bound command to its handler.
pub async fn dispatch(cmd: Command, settings: &Settings, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Run => run::handle(settings).await,
        Command::Check => check::handle(settings, global).await,
        Command::Locations => cloud::locations(settings, global).await,
        Command::Devices(args) => cloud::devices(settings, args, global).await,
        Command::Discover(args) => cloud::discover(settings, args, global).await,
        Command::Sync => sync::handle(settings, global).await,
        Command::Trigger(args) => trigger::handle(settings, args, global).await,
        // Config and Completions are handled before dispatch
        Command::Config(_) | Command::Completions(_) => Err(CliError::Internal(
            "local command routed to the cloud dispatcher".into(),
        )),
    }
}
