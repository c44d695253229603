//! Route table: path prefix → service.
//!
//! # Design Decisions
//! - Prefixes match on segment boundaries ("/user" matches "/user" and
//!   "/user/hello", not "/users")
//! - Longest prefix wins; ties keep config order
//! - Path matching is case-sensitive, no regex

use crate::config::RouteConfig;

#[derive(Debug, Clone)]
struct Route {
    prefix: String,
    service: String,
    strip_prefix: bool,
}

/// A matched route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    pub service: &'a str,
    /// Path to send upstream, always starting with '/'.
    pub forward_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    pub fn from_config(routes: &[RouteConfig]) -> Self {
        let mut routes: Vec<Route> = routes
            .iter()
            .map(|r| Route {
                prefix: r.path_prefix.trim_end_matches('/').to_string(),
                service: r.service.clone(),
                strip_prefix: r.strip_prefix,
            })
            .collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn match_path(&self, path: &str) -> Option<RouteMatch<'_>> {
        self.routes.iter().find_map(|route| {
            let rest = path.strip_prefix(route.prefix.as_str())?;
            if !(rest.is_empty() || rest.starts_with('/')) {
                return None;
            }
            let forward_path = if !route.strip_prefix {
                path.to_string()
            } else if rest.is_empty() {
                "/".to_string()
            } else {
                rest.to_string()
            };
            Some(RouteMatch {
                service: &route.service,
                forward_path,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(prefix: &str, service: &str, strip: bool) -> RouteConfig {
        RouteConfig {
            path_prefix: prefix.into(),
            service: service.into(),
            strip_prefix: strip,
        }
    }

    #[test]
    fn test_prefix_strip() {
        let table = RouteTable::from_config(&[route("/user", "user", true)]);
        let m = table.match_path("/user/hello").unwrap();
        assert_eq!(m.service, "user");
        assert_eq!(m.forward_path, "/hello");
        assert_eq!(table.match_path("/user").unwrap().forward_path, "/");
        assert!(table.match_path("/users").is_none());
        assert!(table.match_path("/order/1").is_none());
    }

    #[test]
    fn test_keep_prefix() {
        let table = RouteTable::from_config(&[route("/user/", "user", false)]);
        assert_eq!(table.match_path("/user/hello").unwrap().forward_path, "/user/hello");
    }

    #[test]
    fn test_longest_prefix_wins() {
        let table = RouteTable::from_config(&[route("/api", "api", true), route("/api/user", "user", true)]);
        assert_eq!(table.match_path("/api/user/1").unwrap().service, "user");
        assert_eq!(table.match_path("/api/order/1").unwrap().service, "api");
    }

    #[test]
    fn test_root_prefix_matches_everything() {
        let table = RouteTable::from_config(&[route("/", "web", false)]);
        assert_eq!(table.match_path("/anything").unwrap().service, "web");
    }
}
