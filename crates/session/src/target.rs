/// First path segment that marks a request as addressing an agent instance.
pub const AGENTS_PATH_PREFIX: &str = "agents";

/// Namespace and instance name addressed by a request path, or `None` for
/// each when the path does not address an agent.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentTarget {
    pub namespace: Option<String>,
    pub name: Option<String>,
}

impl AgentTarget {
    #[must_use]
    pub fn is_agent(&self) -> bool {
        self.namespace.is_some() && self.name.is_some()
    }
}

/// Splits a URL path on `/`, drops empty segments, and reads the agent
/// namespace and instance name from segments two and three. Paths with fewer
/// than three segments, or whose first segment is not `agents`, yield an
/// empty target. Segments past the third are ignored.
#[must_use]
pub fn parse_agent_target(path: &str) -> AgentTarget {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    if segments.len() < 3 || segments[0] != AGENTS_PATH_PREFIX {
        return AgentTarget::default();
    }
    AgentTarget {
        namespace: Some(segments[1].to_string()),
        name: Some(segments[2].to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespace_and_name() {
        let target = parse_agent_target("/agents/chat/user_1:2024-05-01");
        assert_eq!(target.namespace.as_deref(), Some("chat"));
        assert_eq!(target.name.as_deref(), Some("user_1:2024-05-01"));
        assert!(target.is_agent());
    }

    #[test]
    fn tolerates_duplicate_and_trailing_slashes() {
        let target = parse_agent_target("//agents//chat//alpha//");
        assert_eq!(target.namespace.as_deref(), Some("chat"));
        assert_eq!(target.name.as_deref(), Some("alpha"));
    }

    #[test]
    fn ignores_segments_past_the_name() {
        let target = parse_agent_target("/agents/chat/alpha/messages/extra");
        assert_eq!(target.namespace.as_deref(), Some("chat"));
        assert_eq!(target.name.as_deref(), Some("alpha"));
    }

    #[test]
    fn too_few_segments_yields_empty_target() {
        let target = parse_agent_target("/agents/chat");
        assert_eq!(target, AgentTarget::default());
        assert!(!target.is_agent());
    }

    #[test]
    fn wrong_prefix_yields_empty_target() {
        let target = parse_agent_target("/api/chat/alpha");
        assert_eq!(target, AgentTarget::default());
    }

    #[test]
    fn empty_path_yields_empty_target() {
        assert_eq!(parse_agent_target(""), AgentTarget::default());
        assert_eq!(parse_agent_target("/"), AgentTarget::default());
    }
}
