//! Task name to handler mapping
//!
//! The registry is assembled once at startup and is immutable afterwards.
//! The worker receives it explicitly instead of reaching for global state.

use crate::context::WorkerContext;
use async_trait::async_trait;
use fpid_common::tasks::TaskArgs;
use fpid_common::{Error, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A job the worker can run by name
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn run(&self, ctx: &WorkerContext, args: &TaskArgs) -> Result<()>;
}

pub struct TaskRegistry {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskRegistry {
    pub fn builder() -> TaskRegistryBuilder {
        TaskRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered task names, sorted
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for TaskRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskRegistry")
            .field("tasks", &self.names())
            .finish()
    }
}

#[derive(Default)]
pub struct TaskRegistryBuilder {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
    duplicates: Vec<String>,
}

impl TaskRegistryBuilder {
    pub fn register(mut self, name: impl Into<String>, handler: impl TaskHandler + 'static) -> Self {
        let name = name.into();
        if self.handlers.contains_key(&name) {
            self.duplicates.push(name);
        } else {
            self.handlers.insert(name, Arc::new(handler));
        }
        self
    }

    /// Fails if any task name was registered twice
    pub fn build(self) -> Result<TaskRegistry> {
        if !self.duplicates.is_empty() {
            return Err(Error::Config(format!(
                "task registered more than once: {}",
                self.duplicates.join(", ")
            )));
        }
        Ok(TaskRegistry {
            handlers: self.handlers,
        })
    }
}
