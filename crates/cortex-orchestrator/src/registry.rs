//! [`ConnectorRegistry`] – maps command types to connectors.
//!
//! Each agent action registers a *route*: the command type the LLM emits
//! (its `llm_label`), the action name used by `action_dependencies`, the
//! connector and the per-call deadline.  Catch-all connectors (simulators)
//! receive every command regardless of type.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::connector::Connector;

/// One destination for a command.
#[derive(Clone)]
pub struct Route {
    pub action: String,
    pub connector: Arc<dyn Connector>,
    pub timeout: Duration,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("action", &self.action)
            .field("connector", &self.connector.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Default, Clone)]
pub struct ConnectorRegistry {
    routes: HashMap<String, Vec<Route>>,
    catch_all: Vec<Route>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route commands of type `label` to `connector` as action `action`.
    /// The deadline defaults to the connector's own.
    pub fn register(
        &mut self,
        label: impl Into<String>,
        action: impl Into<String>,
        connector: Arc<dyn Connector>,
        timeout: Option<Duration>,
    ) {
        let timeout = timeout.unwrap_or_else(|| connector.timeout());
        self.routes.entry(label.into()).or_default().push(Route {
            action: action.into(),
            connector,
            timeout,
        });
    }

    /// Deliver every command to `connector`.
    pub fn register_catch_all(&mut self, connector: Arc<dyn Connector>) {
        let timeout = connector.timeout();
        self.catch_all.push(Route {
            action: connector.name().to_string(),
            connector,
            timeout,
        });
    }

    /// All destinations of a command type, typed routes first.
    pub fn routes_for(&self, kind: &str) -> Vec<Route> {
        self.routes
            .get(kind)
            .into_iter()
            .flatten()
            .chain(self.catch_all.iter())
            .cloned()
            .collect()
    }

    /// The action name a command type stands for in dependency maps.
    pub fn action_name<'a>(&'a self, kind: &'a str) -> &'a str {
        self.routes
            .get(kind)
            .and_then(|routes| routes.first())
            .map(|r| r.action.as_str())
            .unwrap_or(kind)
    }

    /// Every distinct connector, in registration order.
    pub fn connectors(&self) -> Vec<Arc<dyn Connector>> {
        let mut out: Vec<Arc<dyn Connector>> = Vec::new();
        let mut labels: Vec<&String> = self.routes.keys().collect();
        labels.sort();
        let all = labels
            .into_iter()
            .flat_map(|l| self.routes[l].iter())
            .chain(self.catch_all.iter());
        for route in all {
            if !out.iter().any(|c| Arc::ptr_eq(c, &route.connector)) {
                out.push(Arc::clone(&route.connector));
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty() && self.catch_all.is_empty()
    }
}
