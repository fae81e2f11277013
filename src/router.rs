//! Route table compilation.
//!
//! A routed component keeps the current path and one route child. Navigation
//! to the current path is a no-op; otherwise the old child is destroyed and
//! the matching one (or the default) is constructed before the route anchor.

use serde::{Deserialize, Serialize};

use crate::ast::Component;
use crate::regions::PropInit;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledRoute {
    pub path: String,
    pub component: String,
    pub props: Vec<PropInit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlan {
    pub routes: Vec<CompiledRoute>,
    /// Index of the route used when nothing matches.
    pub default: Option<usize>,
}

impl RoutePlan {
    pub fn resolve(&self, path: &str) -> Option<&CompiledRoute> {
        let normalized = normalize(path);
        self.routes
            .iter()
            .find(|r| normalize(&r.path) == normalized)
            .or_else(|| self.default.and_then(|i| self.routes.get(i)))
    }

    /// Path the router starts on when the host has no current location.
    pub fn initial_path(&self) -> Option<&str> {
        self.routes.first().map(|r| r.path.as_str())
    }
}

fn normalize(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/"
    } else {
        trimmed
    }
}

pub fn plan_router(component: &Component) -> Option<RoutePlan> {
    let table = component.router.as_ref()?;
    if table.routes.is_empty() {
        return None;
    }
    let routes: Vec<CompiledRoute> = table
        .routes
        .iter()
        .map(|r| CompiledRoute {
            path: r.path.clone(),
            component: r.component.clone(),
            props: r.props.iter().map(PropInit::from).collect(),
        })
        .collect();
    let default = table.routes.iter().position(|r| r.default);
    Some(RoutePlan { routes, default })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> RoutePlan {
        RoutePlan {
            routes: vec![
                CompiledRoute {
                    path: "/".into(),
                    component: "Home".into(),
                    props: vec![],
                },
                CompiledRoute {
                    path: "/about".into(),
                    component: "About".into(),
                    props: vec![],
                },
                CompiledRoute {
                    path: "/404".into(),
                    component: "NotFound".into(),
                    props: vec![],
                },
            ],
            default: Some(2),
        }
    }

    #[test]
    fn test_exact_match_ignores_trailing_slash() {
        assert_eq!(plan().resolve("/about/").unwrap().component, "About");
        assert_eq!(plan().resolve("").unwrap().component, "Home");
    }

    #[test]
    fn test_unmatched_uses_default() {
        assert_eq!(plan().resolve("/missing").unwrap().component, "NotFound");
        let mut no_default = plan();
        no_default.default = None;
        assert!(no_default.resolve("/missing").is_none());
    }

    #[test]
    fn test_initial_path() {
        assert_eq!(plan().initial_path(), Some("/"));
    }
}
