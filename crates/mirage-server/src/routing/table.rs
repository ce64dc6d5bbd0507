//! Route registration and lookup.
//!
//! Each environment builds one [`RouteTable`]. Patterns are kept in one
//! `matchit` radix router per method; routes that normalize to the same
//! method and pattern share a group whose first member is the statically
//! bound route. Remaining members are only reachable through duplicate
//! resolution on the request query.

use super::query::stable_params;
use crate::environment::{Environment, HttpMethod, Route};
use crate::error::RouteRegistrationError;
use matchit::Router;
use std::collections::HashMap;
use tracing::{debug, warn};

/// The route picked for a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRoute {
    /// Index into `Environment::routes`.
    pub route_index: usize,
    pub path_params: HashMap<String, String>,
}

#[derive(Debug)]
struct RouteGroup {
    pattern: String,
    /// Route indices in declaration order.
    members: Vec<usize>,
}

pub struct RouteTable {
    routers: HashMap<HttpMethod, Router<usize>>,
    groups: Vec<RouteGroup>,
    group_lookup: HashMap<(HttpMethod, String), usize>,
    volatile: Vec<String>,
    /// Declared query string per route index.
    declared_queries: Vec<Option<String>>,
}

impl RouteTable {
    /// Register every route of `env`.
    ///
    /// Routes with an unusable pattern are skipped and reported in the
    /// returned error list; the rest of the table is still usable.
    pub fn build(env: &Environment) -> (Self, Vec<RouteRegistrationError>) {
        let mut table = RouteTable {
            routers: HashMap::new(),
            groups: Vec::new(),
            group_lookup: HashMap::new(),
            volatile: env.volatile_query_params.clone(),
            declared_queries: env
                .routes
                .iter()
                .map(|r| r.endpoint_query().map(str::to_string))
                .collect(),
        };
        let mut errors = Vec::new();

        for (idx, route) in env.routes.iter().enumerate() {
            if let Err(e) = table.register(env.endpoint_prefix.as_deref(), idx, route) {
                warn!("Skipping route {} {}: {}", route.method, route.endpoint, e.reason);
                errors.push(e);
            }
        }

        debug!(
            "Route table built: {} routes in {} groups, {} rejected",
            env.routes.len() - errors.len(),
            table.groups.len(),
            errors.len()
        );
        (table, errors)
    }

    fn register(
        &mut self,
        prefix: Option<&str>,
        idx: usize,
        route: &Route,
    ) -> Result<(), RouteRegistrationError> {
        let pattern = to_router_pattern(prefix, route.endpoint_path()).map_err(|reason| {
            RouteRegistrationError {
                endpoint: route.endpoint.clone(),
                reason,
            }
        })?;

        let key = (route.method, pattern.clone());
        if let Some(&group) = self.group_lookup.get(&key) {
            self.groups[group].members.push(idx);
            return Ok(());
        }

        let group = self.groups.len();
        self.routers
            .entry(route.method)
            .or_insert_with(Router::new)
            .insert(pattern.as_str(), group)
            .map_err(|e| RouteRegistrationError {
                endpoint: route.endpoint.clone(),
                reason: e.to_string(),
            })?;

        self.groups.push(RouteGroup {
            pattern,
            members: vec![idx],
        });
        self.group_lookup.insert(key, group);
        Ok(())
    }

    /// Select the route serving `method path?query`, if any.
    ///
    /// `HEAD` falls back to the `GET` route when no `HEAD` route matches.
    pub fn resolve(
        &self,
        method: HttpMethod,
        path: &str,
        query: Option<&str>,
    ) -> Option<ResolvedRoute> {
        let found = self.lookup(method, path).or_else(|| {
            (method == HttpMethod::Head)
                .then(|| self.lookup(HttpMethod::Get, path))
                .flatten()
        })?;
        let (group, path_params) = found;
        let group = &self.groups[group];

        let route_index = if group.members.len() > 1 {
            self.pick_duplicate(&group.members, query)
        } else {
            group.members[0]
        };

        debug!(
            "Resolved {} {} to route #{} ({})",
            method, path, route_index, group.pattern
        );
        Some(ResolvedRoute {
            route_index,
            path_params,
        })
    }

    fn lookup(&self, method: HttpMethod, path: &str) -> Option<(usize, HashMap<String, String>)> {
        let router = self.routers.get(&method)?;
        let matched = router.at(path).ok().or_else(|| {
            let trimmed = path.trim_end_matches('/');
            (trimmed.len() != path.len() && !trimmed.is_empty())
                .then(|| router.at(trimmed).ok())
                .flatten()
        })?;

        let params = matched
            .params
            .iter()
            .map(|(k, v)| {
                let value = urlencoding::decode(v)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| v.to_string());
                (k.to_string(), value)
            })
            .collect();
        Some((*matched.value, params))
    }

    /// First member whose filtered declared query equals the filtered request
    /// query, else the bound route.
    fn pick_duplicate(&self, members: &[usize], query: Option<&str>) -> usize {
        let wanted = stable_params(query, &self.volatile);
        members
            .iter()
            .copied()
            .find(|&idx| {
                let declared = self.declared_queries[idx].as_deref();
                stable_params(declared, &self.volatile) == wanted
            })
            .unwrap_or(members[0])
    }
}

/// Build the radix pattern for a route.
///
/// `:name` segments become `{name}` parameters and a trailing `*` segment
/// becomes a catch-all. Anything else that looks like pattern syntax is
/// rejected.
pub fn to_router_pattern(prefix: Option<&str>, endpoint_path: &str) -> Result<String, String> {
    let raw = match prefix.map(str::trim).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("/{prefix}/{endpoint_path}"),
        None => format!("/{endpoint_path}"),
    };
    let raw = raw.replace(' ', "%20");

    let segments: Vec<&str> = raw.split('/').filter(|s| !s.is_empty()).collect();
    let mut out = Vec::with_capacity(segments.len());

    for (i, segment) in segments.iter().enumerate() {
        let last = i + 1 == segments.len();
        if let Some(name) = segment.strip_prefix(':') {
            if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                return Err(format!("invalid parameter name in segment '{segment}'"));
            }
            out.push(format!("{{{name}}}"));
        } else if *segment == "*" {
            if !last {
                return Err("wildcard '*' is only allowed as the last segment".to_string());
            }
            out.push("{*wildcard}".to_string());
        } else if let Some(c) = segment.chars().find(|c| "()[]{}?*".contains(*c)) {
            return Err(format!("unsupported character '{c}' in segment '{segment}'"));
        } else {
            out.push(segment.to_string());
        }
    }

    Ok(format!("/{}", out.join("/")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(routes: &[(&str, &str)]) -> Environment {
        let routes: Vec<_> = routes
            .iter()
            .map(|(method, endpoint)| serde_json::json!({"method": method, "endpoint": endpoint}))
            .collect();
        let mut env: Environment = serde_json::from_value(serde_json::json!({
            "port": 0,
            "routes": routes,
            "volatileQueryParams": ["ts", "lat"],
        }))
        .unwrap();
        env.refresh_duplicates();
        env
    }

    #[test]
    fn test_pattern_normalization() {
        assert_eq!(to_router_pattern(None, "status").unwrap(), "/status");
        assert_eq!(to_router_pattern(Some("api"), "//users//list/").unwrap(), "/api/users/list");
        assert_eq!(to_router_pattern(None, "my file").unwrap(), "/my%20file");
        assert_eq!(to_router_pattern(None, "users/:id").unwrap(), "/users/{id}");
        assert_eq!(to_router_pattern(None, "files/*").unwrap(), "/files/{*wildcard}");
        assert_eq!(to_router_pattern(None, "").unwrap(), "/");
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(to_router_pattern(None, "users/(id").is_err());
        assert!(to_router_pattern(None, "users/[0-9]").is_err());
        assert!(to_router_pattern(None, "*/tail").is_err());
        assert!(to_router_pattern(None, "users/:").is_err());
        assert!(to_router_pattern(None, "a{b}").is_err());
    }

    #[test]
    fn test_invalid_route_is_skipped() {
        let env = env_with(&[("get", "bad(route"), ("get", "good")]);
        let (table, errors) = RouteTable::build(&env);

        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].endpoint, "bad(route");
        let resolved = table.resolve(HttpMethod::Get, "/good", None).unwrap();
        assert_eq!(resolved.route_index, 1);
    }

    #[test]
    fn test_path_params_and_trailing_slash() {
        let env = env_with(&[("get", "users/:id")]);
        let (table, _) = RouteTable::build(&env);

        let resolved = table.resolve(HttpMethod::Get, "/users/42/", None).unwrap();
        assert_eq!(resolved.path_params.get("id"), Some(&"42".to_string()));
        assert!(table.resolve(HttpMethod::Post, "/users/42", None).is_none());
        assert!(table.resolve(HttpMethod::Get, "/other", None).is_none());
    }

    #[test]
    fn test_prefix_is_applied() {
        let mut env = env_with(&[("get", "status")]);
        env.endpoint_prefix = Some("api/v1".to_string());
        let (table, _) = RouteTable::build(&env);

        assert!(table.resolve(HttpMethod::Get, "/api/v1/status", None).is_some());
        assert!(table.resolve(HttpMethod::Get, "/status", None).is_none());
    }

    #[test]
    fn test_duplicate_resolution_by_query() {
        let env = env_with(&[("get", "items?type=a"), ("get", "items?type=b")]);
        let (table, errors) = RouteTable::build(&env);
        assert!(errors.is_empty());

        let pick = |q| table.resolve(HttpMethod::Get, "/items", q).unwrap().route_index;
        assert_eq!(pick(Some("type=b&ts=123")), 1);
        assert_eq!(pick(Some("ts=5&type=a")), 0);
        // No exact match falls back to the bound route.
        assert_eq!(pick(Some("type=c")), 0);
        assert_eq!(pick(None), 0);
    }

    #[test]
    fn test_duplicate_resolution_is_deterministic() {
        let env = env_with(&[
            ("get", "items?type=a"),
            ("get", "items?type=b&ts=1"),
            ("get", "items?type=b"),
        ]);
        let (table, _) = RouteTable::build(&env);

        for _ in 0..10 {
            let resolved = table
                .resolve(HttpMethod::Get, "/items", Some("type=b"))
                .unwrap();
            assert_eq!(resolved.route_index, 1);
        }
    }

    #[test]
    fn test_head_falls_back_to_get() {
        let env = env_with(&[("get", "status")]);
        let (table, _) = RouteTable::build(&env);
        let resolved = table.resolve(HttpMethod::Head, "/status", None).unwrap();
        assert_eq!(resolved.route_index, 0);
    }
}
