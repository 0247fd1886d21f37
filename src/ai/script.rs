//! Allow-listed scripted behaviors
//!
//! Scripts are registered under dotted names (`ai.guard.patrol`). A name
//! resolves only if its first segment is one of the configured namespaces.
//! A script is either a native closure or a Lua chunk; both see the same
//! [`ScriptView`] and answer with [`ScriptCommand`]s.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::sandbox::{Sandbox, SandboxConfig, SandboxError};
use crate::actor::ActorId;

static SCRIPT_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*(\.[a-z_][a-z0-9_]*)+$").expect("valid script name regex")
});

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid script name '{0}'")]
    InvalidName(String),

    #[error("script '{0}' is outside the allowed namespaces")]
    Forbidden(String),

    #[error("no script registered as '{0}'")]
    NotFound(String),

    #[error("script '{name}' failed: {reason}")]
    Failed { name: String, reason: String },

    #[error(transparent)]
    Sandbox(#[from] SandboxError),
}

/// Another actor as a script sees it
#[derive(Debug, Clone, Serialize)]
pub struct OccupantView {
    pub id: ActorId,
    pub name: String,
    pub health: i32,
    pub ally: bool,
}

/// Read-only snapshot handed to a script
#[derive(Debug, Clone, Serialize)]
pub struct ScriptView {
    pub actor: ActorId,
    pub name: String,
    pub health: i32,
    pub max_health: i32,
    pub in_combat: bool,
    pub target: Option<ActorId>,
    pub exits: Vec<String>,
    pub items: Vec<String>,
    pub occupants: Vec<OccupantView>,
    pub aggressors: Vec<ActorId>,
}

/// What a script may ask for
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ScriptCommand {
    Attack { target: ActorId },
    Move { exit: String },
    Flee { exit: String },
    Take { item: String },
    Say { text: String },
}

pub type NativeScript =
    Arc<dyn Fn(&ScriptView) -> Result<Vec<ScriptCommand>, ScriptError> + Send + Sync>;

#[derive(Clone)]
enum ScriptSource {
    Native(NativeScript),
    Lua(Arc<str>),
}

pub struct ScriptRegistry {
    namespaces: Vec<String>,
    scripts: RwLock<HashMap<String, ScriptSource>>,
    sandbox: SandboxConfig,
}

impl std::fmt::Debug for ScriptRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptRegistry")
            .field("namespaces", &self.namespaces)
            .field("scripts", &self.scripts.read().len())
            .finish()
    }
}

impl ScriptRegistry {
    pub fn new(namespaces: Vec<String>, sandbox: SandboxConfig) -> Self {
        Self {
            namespaces,
            scripts: RwLock::new(HashMap::new()),
            sandbox,
        }
    }

    fn check_name(&self, name: &str) -> Result<(), ScriptError> {
        if !SCRIPT_NAME.is_match(name) {
            return Err(ScriptError::InvalidName(name.to_string()));
        }
        let namespace = name.split('.').next().unwrap_or_default();
        if !self.namespaces.iter().any(|ns| ns == namespace) {
            return Err(ScriptError::Forbidden(name.to_string()));
        }
        Ok(())
    }

    pub fn register_native<F>(&self, name: &str, script: F) -> Result<(), ScriptError>
    where
        F: Fn(&ScriptView) -> Result<Vec<ScriptCommand>, ScriptError> + Send + Sync + 'static,
    {
        self.check_name(name)?;
        self.scripts
            .write()
            .insert(name.to_string(), ScriptSource::Native(Arc::new(script)));
        Ok(())
    }

    /// Register a Lua chunk. It reads `ctx` and returns a list of commands
    /// such as `{ { action = "attack", target = "rat" } }`, or nil.
    pub fn register_lua(&self, name: &str, source: &str) -> Result<(), ScriptError> {
        self.check_name(name)?;
        self.scripts
            .write()
            .insert(name.to_string(), ScriptSource::Lua(Arc::from(source)));
        Ok(())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.scripts.read().contains_key(name)
    }

    pub fn run(&self, name: &str, view: &ScriptView) -> Result<Vec<ScriptCommand>, ScriptError> {
        self.check_name(name)?;
        let source = self
            .scripts
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| ScriptError::NotFound(name.to_string()))?;

        debug!("Running script {} for {}", name, view.actor);
        match source {
            ScriptSource::Native(script) => script(view),
            ScriptSource::Lua(code) => {
                let mut sandbox = Sandbox::new(self.sandbox.clone())?;
                let commands: Option<Vec<ScriptCommand>> = sandbox.evaluate(name, &code, view)?;
                Ok(commands.unwrap_or_default())
            }
        }
    }
}
