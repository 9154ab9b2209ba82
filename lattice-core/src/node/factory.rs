use crate::net::ConnectionDescription;
use crate::node::{Node, NodeId};

/// Creates the [`Node`]s a config manages.
///
/// Applications override this to name or pre-configure nodes.
pub trait NodeFactory: Send + Sync {
    fn create_node(&self, id: NodeId, description: ConnectionDescription) -> Node;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultNodeFactory;

impl NodeFactory for DefaultNodeFactory {
    fn create_node(&self, id: NodeId, description: ConnectionDescription) -> Node {
        let name = match description.hostname.as_str() {
            "" => format!("node-{id}"),
            host => format!("{host}:{}", description.port),
        };
        Node::new(id, description).with_name(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_after_host() {
        let node = DefaultNodeFactory.create_node(2, ConnectionDescription::tcp("render1", 4243));
        assert_eq!(node.name(), "render1:4243");
        assert_eq!(node.id(), 2);

        let node = DefaultNodeFactory.create_node(3, ConnectionDescription::default());
        assert_eq!(node.name(), "node-3");
    }
}
