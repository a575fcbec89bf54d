//! Name resolution frames.
//!
//! Each SELECT block gets a [`Frame`] listing the relations its FROM clause
//! binds. Expression subqueries see their own frame first, then every
//! enclosing frame from the nearest outwards; a column found in an
//! enclosing frame is a correlation.

use super::NodeId;
use std::collections::BTreeSet;

/// What a FROM entry binds.
#[derive(Debug, Clone)]
pub(crate) enum Binding {
    /// A CTE node defined earlier in the statement.
    Cte {
        id: NodeId,
        name: String,
        outputs: Vec<String>,
    },
    /// A base table. Its schema is unknown, so any column may come from it.
    Base { table: String },
    /// A derived table inlined into the current node.
    Derived {
        alias: Option<String>,
        outputs: Vec<String>,
    },
}

impl Binding {
    /// True when the relation is known to produce `column`.
    fn produces(&self, column: &str) -> bool {
        match self {
            Binding::Cte { outputs, .. } | Binding::Derived { outputs, .. } => {
                outputs.iter().any(|c| c == "*" || c == column)
            }
            Binding::Base { .. } => false,
        }
    }

    fn is_base(&self) -> bool {
        matches!(self, Binding::Base { .. })
    }
}

/// Relations visible to one SELECT block.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// Label of the node the block belongs to.
    pub owner: String,
    pub relations: Vec<(Option<String>, Binding)>,
    /// Projection aliases of the block.
    pub aliases: BTreeSet<String>,
}

impl Frame {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            relations: Vec::new(),
            aliases: BTreeSet::new(),
        }
    }

    pub fn bind(&mut self, name: Option<String>, binding: Binding) {
        self.relations.push((name, binding));
    }

    pub fn find(&self, qualifier: &str) -> Option<&Binding> {
        self.relations
            .iter()
            .find(|(name, _)| name.as_deref() == Some(qualifier))
            .map(|(_, b)| b)
    }

    fn producer_of(&self, column: &str) -> Option<&Binding> {
        self.relations
            .iter()
            .map(|(_, b)| b)
            .find(|b| b.produces(column))
    }

    fn first_base(&self) -> Option<&Binding> {
        self.relations.iter().map(|(_, b)| b).find(|b| b.is_base())
    }

    fn sole(&self) -> Option<&Binding> {
        match self.relations.as_slice() {
            [(_, only)] => Some(only),
            _ => None,
        }
    }
}

/// Where a column reference ended up.
#[derive(Debug)]
pub(crate) enum Resolution<'f> {
    /// A relation of the block itself.
    Local(&'f Binding),
    /// A projection alias of the block.
    Alias,
    /// A relation of an enclosing block.
    Outer { owner: &'f str, binding: &'f Binding },
    /// The qualifier names no visible relation.
    UnknownQualifier,
    /// No relation can supply the column. `sole` is set when the block
    /// reads from exactly one relation, which is then the one at fault.
    Unresolved { sole: Option<&'f Binding> },
}

/// Resolve a column reference against `frame`, then `outer` from the
/// innermost enclosing frame outwards.
///
/// An unqualified column goes to a local relation known to produce it, then
/// a projection alias, then an enclosing relation known to produce it, and
/// only then to a base table, local before outer. Base tables have no known
/// schema, so an unqualified name that an enclosing base table owns still
/// resolves locally when the block reads a base table of its own.
pub(crate) fn resolve<'f>(
    frame: &'f Frame,
    outer: &'f [Frame],
    qualifier: Option<&str>,
    column: &str,
) -> Resolution<'f> {
    if let Some(q) = qualifier {
        if let Some(binding) = frame.find(q) {
            return Resolution::Local(binding);
        }
        for f in outer.iter().rev() {
            if let Some(binding) = f.find(q) {
                return Resolution::Outer {
                    owner: &f.owner,
                    binding,
                };
            }
        }
        return Resolution::UnknownQualifier;
    }

    if let Some(binding) = frame.producer_of(column) {
        return Resolution::Local(binding);
    }
    if frame.aliases.contains(column) {
        return Resolution::Alias;
    }
    // A known output of an enclosing block wins over an open local table.
    for f in outer.iter().rev() {
        if let Some(binding) = f.producer_of(column) {
            return Resolution::Outer {
                owner: &f.owner,
                binding,
            };
        }
    }
    if let Some(binding) = frame.first_base() {
        return Resolution::Local(binding);
    }
    for f in outer.iter().rev() {
        if let Some(binding) = f.first_base() {
            return Resolution::Outer {
                owner: &f.owner,
                binding,
            };
        }
    }

    Resolution::Unresolved { sole: frame.sole() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cte(id: usize, name: &str, outputs: &[&str]) -> Binding {
        Binding::Cte {
            id: NodeId(id),
            name: name.into(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_unqualified_prefers_producing_cte() {
        let mut frame = Frame::new("main");
        frame.bind(Some("t".into()), Binding::Base { table: "t".into() });
        frame.bind(Some("a".into()), cte(0, "a", &["total"]));
        match resolve(&frame, &[], None, "total") {
            Resolution::Local(Binding::Cte { name, .. }) => assert_eq!(name, "a"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_qualified_outer_reference() {
        let mut outer = Frame::new("main");
        outer.bind(Some("o".into()), Binding::Base { table: "orders".into() });
        let mut inner = Frame::new("main.subquery1");
        inner.bind(Some("l".into()), Binding::Base { table: "lineitem".into() });

        let outers = [outer];
        match resolve(&inner, &outers, Some("o"), "o_orderkey") {
            Resolution::Outer { owner, .. } => assert_eq!(owner, "main"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            resolve(&inner, &outers, Some("x"), "k"),
            Resolution::UnknownQualifier
        ));
    }

    #[test]
    fn test_unqualified_outer_output_beats_local_base() {
        let mut outer = Frame::new("main");
        outer.bind(Some("o".into()), cte(0, "o", &["k", "region"]));
        let mut inner = Frame::new("main.subquery1");
        inner.bind(Some("u".into()), Binding::Base { table: "u".into() });

        let outers = [outer];
        match resolve(&inner, &outers, None, "region") {
            Resolution::Outer { owner, binding } => {
                assert_eq!(owner, "main");
                assert!(matches!(binding, Binding::Cte { name, .. } if name == "o"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            resolve(&inner, &outers, None, "x"),
            Resolution::Local(Binding::Base { .. })
        ));
    }

    #[test]
    fn test_sole_cte_missing_column() {
        let mut frame = Frame::new("main");
        frame.bind(Some("a".into()), cte(0, "a", &["k"]));
        assert!(matches!(
            resolve(&frame, &[], None, "missing"),
            Resolution::Unresolved { sole: Some(_) }
        ));
    }
}
