/*!
 * Storage routing and rule evaluation
 *
 * A task's default route is its chosen storage with the task-relative path
 * joined through that storage. When the owning user has rule application
 * enabled, every rule is evaluated against the same default relative path
 * and the last matching rule replaces the default.
 */

use crate::core::rules::CompiledRule;
use crate::error::Result;
use crate::storage::StorageRegistry;
use courier_core_interface::{Persistence, RuleType, Storage, Task, TaskSource};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Resolved destination for a task
#[derive(Clone)]
pub struct Route {
    pub storage: Arc<dyn Storage>,
    /// Backend-resolved target path
    pub path: String,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("storage", &self.storage.name())
            .field("path", &self.path)
            .finish()
    }
}

/// Resolves `(storage, path)` for pending tasks
pub struct StorageRouter {
    registry: Arc<StorageRegistry>,
    persistence: Arc<dyn Persistence>,
}

/// Message text, fetched at most once per resolution
enum MessageText {
    Unfetched,
    Fetched(Option<String>),
}

impl StorageRouter {
    pub fn new(registry: Arc<StorageRegistry>, persistence: Arc<dyn Persistence>) -> Self {
        Self {
            registry,
            persistence,
        }
    }

    pub fn registry(&self) -> &Arc<StorageRegistry> {
        &self.registry
    }

    /// Task-relative path used as the baseline for every rule
    pub fn base_path(task: &Task) -> String {
        if task.storage_path.is_empty() {
            task.file_name()
        } else {
            task.storage_path.clone()
        }
    }

    /// Resolve the destination of `task`
    ///
    /// Fails only when the task's own storage cannot be resolved. Rules that
    /// do not compile or that name an unreachable storage are skipped.
    pub async fn resolve(&self, task: &Task) -> Result<Route> {
        let base = Self::base_path(task);
        let storage = self.registry.get(task.user_id, &task.storage_name)?;
        let default = Route {
            path: storage.join_storage_path(&base),
            storage,
        };

        let user_rules = match self.persistence.user_rules(task.user_id).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(user_id = task.user_id, error = %e, "could not load user rules, using default route");
                return Ok(default);
            }
        };
        if !user_rules.apply_rule || user_rules.rules.is_empty() {
            return Ok(default);
        }

        let mut message = MessageText::Unfetched;
        let mut matched = None;
        for rule in &user_rules.rules {
            let compiled = match CompiledRule::compile(rule) {
                Ok(compiled) => compiled,
                Err(e) => {
                    warn!(error = %e, "skipping rule");
                    continue;
                }
            };
            if let Some(route) = self.apply(&compiled, task, &base, &mut message).await {
                matched = Some(route);
            }
        }

        match matched {
            Some(route) => {
                debug!(task = %task, storage = %route.storage.name(), path = %route.path, "rule matched");
                Ok(route)
            }
            None => Ok(default),
        }
    }

    async fn apply(
        &self,
        rule: &CompiledRule,
        task: &Task,
        base: &str,
        message: &mut MessageText,
    ) -> Option<Route> {
        let matched = match rule.kind() {
            RuleType::FileNameRegex => rule.is_match(&task.file_name()),
            RuleType::MessageRegex => match self.message_text(task, message).await {
                Some(text) => rule.is_match(text),
                None => false,
            },
        };
        if !matched {
            return None;
        }

        let target = rule.rule().target_storage(&task.storage_name);
        let storage = match self.registry.get(task.user_id, target) {
            Ok(storage) => storage,
            Err(e) => {
                warn!(pattern = %rule.rule().pattern, error = %e, "skipping rule");
                return None;
            }
        };

        Some(Route {
            path: storage.join_storage_path(&rule.relative_path(base)),
            storage,
        })
    }

    async fn message_text<'a>(&self, task: &Task, cache: &'a mut MessageText) -> Option<&'a str> {
        if let MessageText::Unfetched = cache {
            let text = match &task.source {
                TaskSource::Message {
                    chat_id,
                    message_id,
                    ..
                } => match self.persistence.message_text(*chat_id, *message_id).await {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(task = %task, error = %e, "could not load message text");
                        None
                    }
                },
                TaskSource::Telegraph { .. } => None,
            };
            *cache = MessageText::Fetched(text);
        }

        match cache {
            MessageText::Fetched(Some(text)) => Some(text.as_str()),
            _ => None,
        }
    }
}
