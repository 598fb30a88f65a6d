#![forbid(unsafe_code)]

//! Single-pass analyzer turning an [`Expr`] into a [`Graph`].
//!
//! The walk carries a small [`Context`]: the node that newly discovered
//! nodes feed into (their downstream) and, inside a conditional, which
//! part of it is being visited. Nodes are keyed by the canonical key of
//! their sub-expression, so repeated reads collapse into one node and only
//! gain links.

use std::cell::Cell;

use ahash::{AHashMap, AHashSet};

use super::conditional::{Bucket, ConditionalNode};
use super::node::{DependencyNode, NodeKind};
use super::{ConditionalId, Graph, NodeId};
use crate::error::{Result, WatchError};
use crate::expr::{Expr, ExprKind, Getter};

/// Which part of a conditional is being visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Part {
    Test,
    IfTrue,
    IfFalse,
}

impl Part {
    fn bucket(self) -> Bucket {
        match self {
            Self::Test => Bucket::TEST,
            Self::IfTrue => Bucket::IF_TRUE,
            Self::IfFalse => Bucket::IF_FALSE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Context {
    downstream: Option<NodeId>,
    conditional: Option<(ConditionalId, Part)>,
}

impl Context {
    fn with_downstream(self, downstream: Option<NodeId>) -> Self {
        Self { downstream, ..self }
    }
}

struct NodeDraft {
    key: String,
    label: String,
    kind: NodeKind,
    accessor: Option<Getter>,
    downstream: Vec<NodeId>,
}

struct ConditionalDraft {
    label: String,
    is_root: bool,
    test: Getter,
    affected: Vec<(NodeId, Bucket)>,
    if_true_children: Vec<ConditionalId>,
    if_false_children: Vec<ConditionalId>,
}

impl ConditionalDraft {
    fn is_empty(&self) -> bool {
        self.affected.iter().all(|(_, bucket)| bucket.is_ungated())
            && self.if_true_children.is_empty()
            && self.if_false_children.is_empty()
    }
}

#[derive(Default)]
pub(super) struct GraphBuilder {
    nodes: Vec<NodeDraft>,
    /// `None` records a read that was classified as untracked.
    index: AHashMap<String, Option<NodeId>>,
    conditionals: Vec<ConditionalDraft>,
    /// Nodes read at least once outside any conditional.
    outside: AHashSet<NodeId>,
}

impl GraphBuilder {
    pub(super) fn build(mut self, expr: &Expr) -> Result<Graph> {
        self.visit(expr, Context::default())?;

        let roots = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, node)| node.kind == NodeKind::Root && !node.downstream.is_empty())
            .map(|(index, _)| NodeId(index))
            .collect();
        let mut conditional_roots = Vec::new();
        for (index, conditional) in self.conditionals.iter().enumerate() {
            if !conditional.is_root {
                continue;
            }
            if conditional.is_empty() {
                // Never gated, so its reads count as plain reads.
                self.outside
                    .extend(conditional.affected.iter().map(|&(node, _)| node));
            } else {
                conditional_roots.push(ConditionalId(index));
            }
        }

        let mut gated = Vec::new();
        let mut pending = conditional_roots.clone();
        while let Some(id) = pending.pop() {
            let conditional = &self.conditionals[id.0];
            gated.extend(conditional.affected.iter().map(|&(node, _)| node));
            pending.extend(&conditional.if_true_children);
            pending.extend(&conditional.if_false_children);
        }
        gated.sort_unstable();
        gated.dedup();
        let ungated = gated
            .iter()
            .copied()
            .filter(|node| self.outside.contains(node))
            .collect();

        Ok(Graph {
            expression: expr.to_string(),
            nodes: self
                .nodes
                .into_iter()
                .map(|draft| {
                    DependencyNode::new(
                        draft.key,
                        draft.label,
                        draft.kind,
                        draft.accessor,
                        draft.downstream,
                    )
                })
                .collect(),
            conditionals: self
                .conditionals
                .into_iter()
                .map(|draft| {
                    ConditionalNode::new(
                        draft.label,
                        draft.is_root,
                        draft.test,
                        &draft.affected,
                        draft.if_true_children,
                        draft.if_false_children,
                    )
                })
                .collect(),
            roots,
            conditional_roots,
            gated,
            ungated,
            gating: Cell::new(false),
        })
    }

    fn visit(&mut self, expr: &Expr, cx: Context) -> Result<()> {
        match expr.kind() {
            ExprKind::Constant(_) => {
                if expr.ty().notifies_property() {
                    self.get_or_create(expr, cx, Some(NodeKind::Root));
                }
                Ok(())
            }
            ExprKind::Variable(var) => {
                // Reassigning a variable is never observed; only a variable
                // holding an observable object is worth a root.
                let kind = var.ty().notifies_property().then_some(NodeKind::Root);
                self.get_or_create(expr, cx, kind);
                Ok(())
            }
            ExprKind::Static(member) => {
                if member.writable {
                    return Err(WatchError::unsupported(
                        expr.to_string(),
                        "settable static members cannot be observed",
                    ));
                }
                self.get_or_create(expr, cx, Some(NodeKind::Root));
                Ok(())
            }
            ExprKind::Member(access) => {
                let Some(member) = access.member else {
                    return Err(WatchError::UnknownMember {
                        type_name: access.owner.ty().name().to_string(),
                        member: access.name.clone(),
                    });
                };
                let tracked = (access.owner.ty().notifies_property() && member.is_property())
                    || member.is_readonly_field();
                if !tracked {
                    return Err(WatchError::unsupported(
                        expr.to_string(),
                        format!(
                            "'{}' is neither a property of an observable type nor a readonly field",
                            access.name
                        ),
                    ));
                }
                let kind = NodeKind::Relay {
                    property: access.name.clone(),
                };
                let node = self.get_or_create(expr, cx, Some(kind));
                self.visit(&access.owner, cx.with_downstream(node))
            }
            ExprKind::Unary { operand, .. } => self.visit(operand, cx),
            ExprKind::Binary { left, right, .. } => {
                let relay = self.virtual_node(expr, cx);
                self.visit(left, relay)?;
                self.visit(right, relay)
            }
            ExprKind::Call(call) => {
                let relay = self.virtual_node(expr, cx);
                if let Some(target) = &call.target {
                    self.visit(target, relay)?;
                }
                for arg in &call.args {
                    self.visit(arg, relay)?;
                }
                Ok(())
            }
            ExprKind::Conditional {
                test,
                if_true,
                if_false,
            } => {
                let conditional = self.create_conditional(expr, test, cx);
                let result = if expr.ty().notifies_property() && cx.downstream.is_some() {
                    self.get_or_create(expr, cx, Some(NodeKind::Virtual))
                } else {
                    None
                };

                let inner = |part| Context {
                    downstream: result,
                    conditional: Some((conditional, part)),
                };
                self.visit(test, inner(Part::Test))?;
                self.visit(if_true, inner(Part::IfTrue))?;
                self.visit(if_false, inner(Part::IfFalse))
            }
        }
    }

    /// Operators and calls relay signals only when something consumes
    /// their result.
    fn virtual_node(&mut self, expr: &Expr, cx: Context) -> Context {
        let node = if cx.downstream.is_some() {
            self.get_or_create(expr, cx, Some(NodeKind::Virtual))
        } else {
            None
        };
        cx.with_downstream(node)
    }

    fn create_conditional(&mut self, expr: &Expr, test: &Expr, cx: Context) -> ConditionalId {
        let id = ConditionalId(self.conditionals.len());
        let parent = match cx.conditional {
            Some((parent, Part::IfTrue)) => Some((parent, true)),
            Some((parent, Part::IfFalse)) => Some((parent, false)),
            Some((_, Part::Test)) | None => None,
        };
        self.conditionals.push(ConditionalDraft {
            label: expr.to_string(),
            is_root: parent.is_none(),
            test: test.compile(),
            affected: Vec::new(),
            if_true_children: Vec::new(),
            if_false_children: Vec::new(),
        });
        if let Some((parent, branch)) = parent {
            let parent = &mut self.conditionals[parent.0];
            if branch {
                parent.if_true_children.push(id);
            } else {
                parent.if_false_children.push(id);
            }
        }
        id
    }

    fn get_or_create(&mut self, expr: &Expr, cx: Context, kind: Option<NodeKind>) -> Option<NodeId> {
        let key = expr.key();
        let existing = self.index.get(&key).copied();
        let id = match existing {
            Some(existing) => existing,
            None => {
                let id = kind.map(|kind| self.push_node(expr, key.clone(), kind));
                self.index.insert(key, id);
                id
            }
        }?;

        match cx.conditional {
            Some((conditional, part)) => self.add_affected(conditional, part.bucket(), id),
            None => {
                self.outside.insert(id);
            }
        }
        if let Some(downstream) = cx.downstream {
            let node = &mut self.nodes[id.0];
            if downstream != id && !node.downstream.contains(&downstream) {
                node.downstream.push(downstream);
            }
        }
        Some(id)
    }

    fn push_node(&mut self, expr: &Expr, key: String, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        let accessor = expr.ty().notifies_property().then(|| expr.compile());
        self.nodes.push(NodeDraft {
            key,
            label: expr.to_string(),
            kind,
            accessor,
            downstream: Vec::new(),
        });
        id
    }

    fn add_affected(&mut self, conditional: ConditionalId, bucket: Bucket, node: NodeId) {
        // Roots have no upstream, so nothing could ever re-activate them.
        if self.nodes[node.0].kind == NodeKind::Root {
            return;
        }
        let affected = &mut self.conditionals[conditional.0].affected;
        match affected.iter_mut().find(|(existing, _)| *existing == node) {
            Some((_, flags)) => *flags |= bucket,
            None => affected.push((node, bucket)),
        }
    }
}
