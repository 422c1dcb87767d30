//! Routing table derived from the graph's connections.

use std::collections::HashMap;

use crate::graph::definition::{GraphConnection, MsgFlow};
use crate::loc::Loc;
use crate::msg::MsgType;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    app_uri: String,
    extension: String,
    kind: MsgType,
    name: String,
}

/// Maps `(source extension, message kind, message name)` to destinations.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    routes: HashMap<RouteKey, Vec<Loc>>,
}

impl RoutingTable {
    pub(crate) fn from_connections(
        connections: &[GraphConnection],
        local_app_uri: &str,
        graph_id: &str,
    ) -> Self {
        let mut routes: HashMap<RouteKey, Vec<Loc>> = HashMap::new();

        for conn in connections {
            let app_uri = conn.app.as_deref().unwrap_or(local_app_uri);
            let flows = conn
                .cmd
                .iter()
                .map(|flow| (MsgType::Cmd, flow))
                .chain(conn.data.iter().map(|flow| (MsgType::Data, flow)));

            for (kind, flow) in flows {
                let key = RouteKey {
                    app_uri: app_uri.to_string(),
                    extension: conn.extension.clone(),
                    kind,
                    name: flow.name.clone(),
                };
                routes
                    .entry(key)
                    .or_default()
                    .extend(Self::flow_dests(flow, local_app_uri, graph_id));
            }
        }

        Self { routes }
    }

    fn flow_dests<'a>(
        flow: &'a MsgFlow,
        local_app_uri: &'a str,
        graph_id: &'a str,
    ) -> impl Iterator<Item = Loc> + 'a {
        flow.dest.iter().map(move |dest| {
            Loc::new(dest.app.as_deref().unwrap_or(local_app_uri), graph_id)
                .with_extension(dest.extension.clone())
        })
    }

    /// Destinations of a message leaving `src`; empty when nothing is
    /// connected.
    pub fn destinations(&self, src: &Loc, kind: MsgType, name: &str) -> &[Loc] {
        let Some(extension) = src.extension_name() else {
            return &[];
        };
        let key = RouteKey {
            app_uri: src.app_uri.clone(),
            extension: extension.to_string(),
            kind,
            name: name.to_string(),
        };
        self.routes.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::definition::GraphDefinition;

    #[test]
    fn test_destinations() {
        let graph = GraphDefinition::from_json(
            r#"{"nodes": [
                    {"type": "extension", "name": "asr", "addon": "x"},
                    {"type": "extension", "name": "llm", "addon": "y"},
                    {"type": "extension", "name": "ui", "addon": "z"}
                ],
                "connections": [{"extension": "asr",
                    "cmd": [{"name": "flush", "dest": [{"extension": "llm"}]}],
                    "data": [{"name": "text", "dest": [{"extension": "llm"}, {"extension": "ui"}]}]}]}"#,
        )
        .unwrap();
        let table = RoutingTable::from_connections(&graph.connections, "app", "g1");

        let src = Loc::new("app", "g1").with_extension("asr");
        let text = table.destinations(&src, MsgType::Data, "text");
        assert_eq!(text.len(), 2);
        assert_eq!(text[1], Loc::new("app", "g1").with_extension("ui"));

        assert_eq!(table.destinations(&src, MsgType::Cmd, "flush").len(), 1);
        assert!(table.destinations(&src, MsgType::Cmd, "text").is_empty());
        assert!(table.destinations(&Loc::new("app", "g1"), MsgType::Data, "text").is_empty());
    }
}
