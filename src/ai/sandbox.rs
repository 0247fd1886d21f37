//! Lua sandbox for scripted behaviors
//!
//! A fresh sandbox is built for every script invocation: scripts share no
//! state, and the `Lua` state never crosses an await point.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use mlua::{HookTriggers, Lua, LuaSerdeExt, Result as LuaResult, StdLib, Value, VmState};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Sandbox configuration
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Maximum instructions per execution (default: 1,000,000)
    pub max_instructions: u64,
    /// Maximum memory in bytes (default: 16MB)
    pub max_memory: usize,
    /// Execution timeout (default: 50ms)
    pub timeout: Duration,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            max_instructions: 1_000_000,
            max_memory: 16 * 1024 * 1024,
            timeout: Duration::from_millis(50),
        }
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("instruction limit exceeded ({0} > {1})")]
    InstructionLimitExceeded(u64, u64),

    #[error("memory limit exceeded ({0} bytes)")]
    MemoryLimitExceeded(usize),

    #[error("execution timeout ({0:?})")]
    Timeout(Duration),

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),
}

const HOOK_STRIDE: u32 = 1000;

pub struct Sandbox {
    lua: Lua,
    config: SandboxConfig,
    instruction_count: Arc<AtomicU64>,
    over_budget: Arc<AtomicBool>,
    timed_out: Arc<AtomicBool>,
    started: Arc<parking_lot::Mutex<Instant>>,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Result<Self, SandboxError> {
        let lua = Lua::new_with(
            StdLib::STRING | StdLib::TABLE | StdLib::MATH | StdLib::UTF8,
            mlua::LuaOptions::default(),
        )?;
        lua.set_memory_limit(config.max_memory)?;

        let instruction_count = Arc::new(AtomicU64::new(0));
        let over_budget = Arc::new(AtomicBool::new(false));
        let timed_out = Arc::new(AtomicBool::new(false));
        let started = Arc::new(parking_lot::Mutex::new(Instant::now()));

        let count = instruction_count.clone();
        let budget_flag = over_budget.clone();
        let timeout_flag = timed_out.clone();
        let start = started.clone();
        let max_instructions = config.max_instructions;
        let timeout = config.timeout;

        lua.set_hook(
            HookTriggers::new().every_nth_instruction(HOOK_STRIDE),
            move |_lua, _debug| {
                let current =
                    count.fetch_add(HOOK_STRIDE as u64, Ordering::Relaxed) + HOOK_STRIDE as u64;
                if current > max_instructions {
                    budget_flag.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::runtime("instruction limit exceeded"));
                }
                if start.lock().elapsed() > timeout {
                    timeout_flag.store(true, Ordering::Relaxed);
                    return Err(mlua::Error::runtime("execution timeout"));
                }
                Ok(VmState::Continue)
            },
        );

        Self::remove_dangerous_globals(&lua)?;

        Ok(Self {
            lua,
            config,
            instruction_count,
            over_budget,
            timed_out,
            started,
        })
    }

    fn remove_dangerous_globals(lua: &Lua) -> LuaResult<()> {
        let globals = lua.globals();
        let dangerous = [
            "os",
            "io",
            "loadfile",
            "dofile",
            "load",
            "loadstring",
            "require",
            "package",
            "debug",
            "collectgarbage",
            "print",
        ];
        for name in dangerous {
            globals.set(name, Value::Nil)?;
        }
        Ok(())
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn instruction_count(&self) -> u64 {
        self.instruction_count.load(Ordering::Relaxed)
    }

    pub fn global_exists(&self, name: &str) -> bool {
        self.lua
            .globals()
            .get::<Value>(name)
            .map(|v| !matches!(v, Value::Nil))
            .unwrap_or(false)
    }

    fn reset(&self) {
        self.instruction_count.store(0, Ordering::Relaxed);
        self.over_budget.store(false, Ordering::Relaxed);
        self.timed_out.store(false, Ordering::Relaxed);
        *self.started.lock() = Instant::now();
    }

    /// Map a raw Lua outcome onto the limit that stopped it, if any
    fn classify<R>(&self, result: LuaResult<R>) -> Result<R, SandboxError> {
        if self.over_budget.load(Ordering::Relaxed) {
            return Err(SandboxError::InstructionLimitExceeded(
                self.instruction_count(),
                self.config.max_instructions,
            ));
        }
        if self.timed_out.load(Ordering::Relaxed) {
            return Err(SandboxError::Timeout(self.config.timeout));
        }
        match result {
            Err(mlua::Error::MemoryError(_)) => {
                Err(SandboxError::MemoryLimitExceeded(self.config.max_memory))
            }
            other => other.map_err(SandboxError::from),
        }
    }

    /// Evaluate a chunk and return its value
    pub fn execute<R>(&mut self, code: &str) -> Result<R, SandboxError>
    where
        R: mlua::FromLuaMulti,
    {
        self.reset();
        let result = self.lua.load(code).eval();
        self.classify(result)
    }

    /// Expose `input` as the global `ctx`, run `code` and deserialize what it returns
    pub fn evaluate<I, T>(&mut self, name: &str, code: &str, input: &I) -> Result<T, SandboxError>
    where
        I: Serialize,
        T: DeserializeOwned,
    {
        self.reset();
        let ctx = self.lua.to_value(input)?;
        self.lua.globals().set("ctx", ctx)?;

        let result = self
            .lua
            .load(code)
            .set_name(name)
            .eval::<Value>()
            .and_then(|value| self.lua.from_value(value));
        self.classify(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_dangerous_globals_removed() {
        let sandbox = Sandbox::new(SandboxConfig::default()).unwrap();
        for name in ["os", "io", "load", "require", "debug", "print"] {
            assert!(!sandbox.global_exists(name), "{} should be gone", name);
        }
        assert!(sandbox.global_exists("string"));
        assert!(sandbox.global_exists("math"));
    }

    #[test]
    fn test_simple_execution() {
        let mut sandbox = Sandbox::new(SandboxConfig::default()).unwrap();
        let result: i64 = sandbox.execute("return 1 + 2").unwrap();
        assert_eq!(result, 3);
    }

    #[test]
    fn test_instruction_limit() {
        let config = SandboxConfig {
            max_instructions: 5_000,
            timeout: Duration::from_secs(10),
            ..Default::default()
        };
        let mut sandbox = Sandbox::new(config).unwrap();

        let result: Result<(), _> = sandbox.execute("while true do end");
        assert!(matches!(
            result,
            Err(SandboxError::InstructionLimitExceeded(_, 5_000))
        ));
    }

    #[test]
    fn test_memory_limit() {
        let config = SandboxConfig {
            max_memory: 1024 * 1024,
            max_instructions: u64::MAX,
            timeout: Duration::from_secs(10),
        };
        let mut sandbox = Sandbox::new(config).unwrap();

        let result: Result<(), _> = sandbox.execute(
            r#"
            local t = {}
            for i = 1, 10000000 do
                t[i] = string.rep("x", 1000)
            end
            "#,
        );
        assert!(result.is_err());
    }

    #[derive(Serialize)]
    struct Input {
        hp: i32,
        exits: Vec<String>,
    }

    #[derive(Debug, Deserialize, PartialEq)]
    struct Output {
        exit: String,
        wounded: bool,
    }

    #[test]
    fn test_evaluate_round_trips_through_ctx() {
        let mut sandbox = Sandbox::new(SandboxConfig::default()).unwrap();
        let input = Input {
            hp: 3,
            exits: vec!["north".into(), "south".into()],
        };

        let output: Output = sandbox
            .evaluate(
                "ai.test",
                "return { exit = ctx.exits[2], wounded = ctx.hp < 5 }",
                &input,
            )
            .unwrap();
        assert_eq!(
            output,
            Output {
                exit: "south".into(),
                wounded: true
            }
        );
    }
}
