//! Dependency and requirement graph expansion.
//!
//! Produces the install order for a formula's transitive closure. The walk
//! is depth-first post-order over the active spec's edges: a formula's
//! requirements are emitted first, then its dependencies (recursively),
//! then the formula itself. So every dependency precedes its dependents and
//! the root comes last.
//!
//! Each formula name appears once. Repeat visits only merge tags into the
//! first emission; a name reached while still being expanded (a cycle) is
//! not entered again and its tags are merged when it is emitted.

use std::collections::{BTreeSet, HashMap};

use cellar_schema::{DepTag, Dependency, Requirement};
use thiserror::Error;
use tracing::debug;

use crate::bottle;
use crate::formula::Formula;
use crate::options::BuildOptions;
use crate::requirement;

/// Resolution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpandError {
    /// The resolver knows no formula by this name.
    #[error("no formula named '{name}' (required by {requested_by})")]
    Unresolved { name: String, requested_by: String },
}

/// Looks up formulae by name for the expander.
pub trait FormulaResolver {
    /// The formula called `name`, with its active variant selected.
    fn resolve(&self, name: &str) -> Option<Formula>;
}

impl<F> FormulaResolver for F
where
    F: Fn(&str) -> Option<Formula>,
{
    fn resolve(&self, name: &str) -> Option<Formula> {
        self(name)
    }
}

/// An edge offered to the filter.
#[derive(Debug, Clone, Copy)]
pub enum Edge<'a> {
    /// Edge to another formula.
    Dependency(&'a Dependency),
    /// Host precondition.
    Requirement(&'a Requirement),
}

impl Edge<'_> {
    /// Target name.
    pub fn name(&self) -> &str {
        match self {
            Edge::Dependency(d) => &d.name,
            Edge::Requirement(r) => &r.name,
        }
    }

    /// Tags declared on the edge.
    pub fn tags(&self) -> &BTreeSet<DepTag> {
        match self {
            Edge::Dependency(d) => &d.tags,
            Edge::Requirement(r) => &r.tags,
        }
    }

    /// Whether the edge carries `tag`.
    pub fn has_tag(&self, tag: DepTag) -> bool {
        self.tags().contains(&tag)
    }
}

/// What the filter wants done with an edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Include the node but do not walk its edges.
    ///
    /// The first edge to reach a name decides whether it is walked: a later
    /// `ExpandAndKeep` edge to a name already kept only adds its tags.
    Keep,
    /// Leave out the edge and everything only reachable through it.
    Skip,
    /// Include the node and walk its edges.
    ExpandAndKeep,
}

/// Where in the walk an edge was found.
#[derive(Debug, Clone, Copy)]
pub struct ExpandContext<'a> {
    /// Formula declaring the edge.
    pub dependent: &'a Formula,
    /// Depth of `dependent`; the root is 0.
    pub depth: usize,
}

/// Payload of an emitted node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    /// A formula to install.
    Formula(Formula),
    /// A precondition to check.
    Requirement(Requirement),
}

/// One entry of the install order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedNode {
    /// What was reached.
    pub kind: NodeKind,
    /// Depth of the first visit.
    pub depth: usize,
    /// Union of tags over every edge that reached the node.
    pub via_tags: BTreeSet<DepTag>,
}

impl ResolvedNode {
    /// Formula or requirement name.
    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::Formula(f) => f.name(),
            NodeKind::Requirement(r) => &r.name,
        }
    }

    /// The formula, if this node is one.
    pub fn formula(&self) -> Option<&Formula> {
        match &self.kind {
            NodeKind::Formula(f) => Some(f),
            NodeKind::Requirement(_) => None,
        }
    }

    /// The requirement, if this node is one.
    pub fn requirement(&self) -> Option<&Requirement> {
        match &self.kind {
            NodeKind::Requirement(r) => Some(r),
            NodeKind::Formula(_) => None,
        }
    }
}

/// Result of an expansion, in install order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expansion {
    nodes: Vec<ResolvedNode>,
}

impl Expansion {
    /// All nodes, dependencies first, root last.
    pub fn nodes(&self) -> &[ResolvedNode] {
        &self.nodes
    }

    /// Take the node list.
    pub fn into_nodes(self) -> Vec<ResolvedNode> {
        self.nodes
    }

    /// Number of nodes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Never true for an expansion that succeeded.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// The formula that was expanded.
    pub fn root(&self) -> Option<&Formula> {
        self.nodes.last().and_then(ResolvedNode::formula)
    }

    /// Formula names in install order, root included.
    pub fn formula_names(&self) -> Vec<&str> {
        self.nodes
            .iter()
            .filter_map(ResolvedNode::formula)
            .map(Formula::name)
            .collect()
    }

    /// Formulae to install before the root.
    pub fn dependencies(&self) -> impl Iterator<Item = &Formula> {
        let end = self.nodes.len().saturating_sub(1);
        self.nodes[..end].iter().filter_map(ResolvedNode::formula)
    }

    /// Requirements in the order they were reached.
    pub fn requirements(&self) -> impl Iterator<Item = &Requirement> {
        self.nodes.iter().filter_map(ResolvedNode::requirement)
    }

    /// Requirements the host does not meet.
    pub fn unsatisfied_requirements(&self) -> Vec<&Requirement> {
        self.requirements()
            .filter(|r| !requirement::is_satisfied(r))
            .collect()
    }

    /// Index of the formula called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.nodes
            .iter()
            .position(|n| matches!(&n.kind, NodeKind::Formula(f) if f.name() == name))
    }

    /// Node of the formula called `name`.
    pub fn get(&self, name: &str) -> Option<&ResolvedNode> {
        self.position(name).map(|i| &self.nodes[i])
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum NodeKey {
    Formula(String),
    Requirement(String),
}

/// Expands formulae into install order using a resolver.
pub struct DependencyGraphExpander<'r> {
    resolver: &'r dyn FormulaResolver,
}

impl<'r> DependencyGraphExpander<'r> {
    /// Expander looking up dependencies through `resolver`.
    pub fn new(resolver: &'r dyn FormulaResolver) -> Self {
        Self { resolver }
    }

    /// Expand everything, no pruning.
    ///
    /// # Errors
    ///
    /// Returns [`ExpandError::Unresolved`] when a dependency is unknown.
    pub fn expand(&self, root: &Formula) -> Result<Expansion, ExpandError> {
        self.expand_with(root, |_: &Edge<'_>, _: &ExpandContext<'_>| Action::ExpandAndKeep)
    }

    /// Expand, asking `filter` about every edge before following it.
    ///
    /// # Errors
    ///
    /// Returns [`ExpandError::Unresolved`] when a dependency that was not
    /// skipped is unknown. Nothing partial is returned.
    pub fn expand_with<F>(&self, root: &Formula, filter: F) -> Result<Expansion, ExpandError>
    where
        F: Fn(&Edge<'_>, &ExpandContext<'_>) -> Action,
    {
        let mut walk = Walk {
            resolver: self.resolver,
            filter: &filter,
            nodes: Vec::new(),
            index: HashMap::new(),
            in_progress: HashMap::new(),
        };
        walk.visit(root.clone(), 0, BTreeSet::new())?;

        debug!(
            formula = root.name(),
            nodes = walk.nodes.len(),
            "expanded dependency graph"
        );
        Ok(Expansion { nodes: walk.nodes })
    }
}

struct Walk<'a, F> {
    resolver: &'a dyn FormulaResolver,
    filter: &'a F,
    nodes: Vec<ResolvedNode>,
    index: HashMap<NodeKey, usize>,
    // Formulae on the current path, with tags gathered while they are open.
    in_progress: HashMap<String, BTreeSet<DepTag>>,
}

impl<F> Walk<'_, F>
where
    F: Fn(&Edge<'_>, &ExpandContext<'_>) -> Action,
{
    fn emit(&mut self, key: NodeKey, kind: NodeKind, depth: usize, via_tags: BTreeSet<DepTag>) {
        self.index.insert(key, self.nodes.len());
        self.nodes.push(ResolvedNode {
            kind,
            depth,
            via_tags,
        });
    }

    // Merge into an emitted or open node. False if the name is new.
    fn merge(&mut self, key: &NodeKey, tags: &BTreeSet<DepTag>) -> bool {
        if let Some(&i) = self.index.get(key) {
            self.nodes[i].via_tags.extend(tags.iter().copied());
            return true;
        }
        if let NodeKey::Formula(name) = key
            && let Some(open) = self.in_progress.get_mut(name)
        {
            open.extend(tags.iter().copied());
            return true;
        }
        false
    }

    fn visit(
        &mut self,
        formula: Formula,
        depth: usize,
        via_tags: BTreeSet<DepTag>,
    ) -> Result<(), ExpandError> {
        self.in_progress.insert(formula.name().to_string(), via_tags);

        let ctx = ExpandContext {
            dependent: &formula,
            depth,
        };

        for req in formula.requirements() {
            if (self.filter)(&Edge::Requirement(req), &ctx) == Action::Skip {
                continue;
            }
            let key = NodeKey::Requirement(req.name.clone());
            if !self.merge(&key, &req.tags) {
                self.emit(
                    key,
                    NodeKind::Requirement(req.clone()),
                    depth + 1,
                    req.tags.clone(),
                );
            }
        }

        for dep in formula.dependencies() {
            let action = (self.filter)(&Edge::Dependency(dep), &ctx);
            if action == Action::Skip {
                continue;
            }
            self.reach(dep, formula.name(), depth + 1, action)?;
        }

        let tags = self
            .in_progress
            .remove(formula.name())
            .unwrap_or_default();
        self.emit(
            NodeKey::Formula(formula.name().to_string()),
            NodeKind::Formula(formula),
            depth,
            tags,
        );
        Ok(())
    }

    fn reach(
        &mut self,
        dep: &Dependency,
        requested_by: &str,
        depth: usize,
        action: Action,
    ) -> Result<(), ExpandError> {
        if self.merge(&NodeKey::Formula(dep.name.clone()), &dep.tags) {
            return Ok(());
        }

        let child = self
            .resolver
            .resolve(&dep.name)
            .ok_or_else(|| ExpandError::Unresolved {
                name: dep.name.clone(),
                requested_by: requested_by.to_string(),
            })?;

        // Aliases resolve to a formula that may already be known.
        let key = NodeKey::Formula(child.name().to_string());
        if child.name() != dep.name && self.merge(&key, &dep.tags) {
            return Ok(());
        }

        match action {
            Action::Keep => {
                self.emit(key, NodeKind::Formula(child), depth, dep.tags.clone());
                Ok(())
            }
            _ => self.visit(child, depth, dep.tags.clone()),
        }
    }
}

/// The standard pruning policy.
///
/// - `optional` edges are followed only when the root was built `with` them.
/// - `recommended` edges are dropped when the root was built `without` them.
/// - `test` edges are followed only for the root, when tests are included.
/// - `build` edges are dropped for a formula that will be poured from a bottle.
///
/// Dependencies below the root are judged as if installed with no flags.
pub fn default_filter(
    options: &BuildOptions,
) -> impl Fn(&Edge<'_>, &ExpandContext<'_>) -> Action + '_ {
    move |edge: &Edge<'_>, ctx: &ExpandContext<'_>| {
        let root = ctx.depth == 0;
        let name = edge.name();

        if edge.has_tag(DepTag::Optional) && !(root && options.with(name)) {
            return Action::Skip;
        }
        if edge.has_tag(DepTag::Recommended) && root && options.without(name) {
            return Action::Skip;
        }
        if edge.has_tag(DepTag::Test) && !(root && options.include_test) {
            return Action::Skip;
        }
        if edge.has_tag(DepTag::Build) {
            let pours = if root {
                bottle::would_pour(ctx.dependent, options)
            } else {
                bottle::would_pour(ctx.dependent, &options.for_dependency())
            };
            if pours {
                return Action::Skip;
            }
        }
        Action::ExpandAndKeep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_schema::{FormulaDefinition, RequirementCheck, SoftwareSpec, Variant};

    struct Graph(HashMap<String, Formula>);

    impl FormulaResolver for Graph {
        fn resolve(&self, name: &str) -> Option<Formula> {
            self.0.get(name).cloned()
        }
    }

    fn formula(name: &str, deps: &[Dependency]) -> Formula {
        let mut spec = SoftwareSpec::new(format!("https://example.com/{name}-1.0.tar.gz"));
        for d in deps {
            spec = spec.depends_on(d.clone());
        }
        let def = FormulaDefinition::new(name).with_spec(Variant::Stable, spec);
        Formula::from_definition(def).unwrap()
    }

    fn dep(name: &str) -> Dependency {
        Dependency::new(name)
    }

    fn graph(formulae: Vec<Formula>) -> Graph {
        Graph(
            formulae
                .into_iter()
                .map(|f| (f.name().to_string(), f))
                .collect(),
        )
    }

    fn names(expansion: &Expansion) -> Vec<&str> {
        expansion.formula_names()
    }

    #[test]
    fn test_post_order() {
        let g = graph(vec![
            formula("a", &[dep("b"), dep("c")]),
            formula("b", &[dep("d")]),
            formula("c", &[]),
            formula("d", &[]),
        ]);
        let root = g.resolve("a").unwrap();

        let expansion = DependencyGraphExpander::new(&g).expand(&root).unwrap();
        assert_eq!(names(&expansion), vec!["d", "b", "c", "a"]);
        assert_eq!(expansion.root().unwrap().name(), "a");
        assert_eq!(expansion.get("a").unwrap().depth, 0);
        assert_eq!(expansion.get("d").unwrap().depth, 2);
        assert_eq!(expansion.dependencies().count(), 3);
    }

    #[test]
    fn test_topological_for_every_edge() {
        let g = graph(vec![
            formula("app", &[dep("net"), dep("ui"), dep("log")]),
            formula("net", &[dep("tls"), dep("log")]),
            formula("ui", &[dep("gfx"), dep("log")]),
            formula("gfx", &[dep("zlib")]),
            formula("tls", &[dep("zlib")]),
            formula("log", &[]),
            formula("zlib", &[]),
        ]);
        let root = g.resolve("app").unwrap();
        let expansion = DependencyGraphExpander::new(&g).expand(&root).unwrap();

        for node in expansion.nodes() {
            let f = node.formula().unwrap();
            let at = expansion.position(f.name()).unwrap();
            for d in f.dependencies() {
                assert!(expansion.position(&d.name).unwrap() < at, "{} before {}", d.name, f.name());
            }
        }
        assert_eq!(expansion.len(), 7);
    }

    #[test]
    fn test_repeat_expansion_identical() {
        let g = graph(vec![
            formula("a", &[dep("b"), dep("c")]),
            formula("b", &[dep("c")]),
            formula("c", &[]),
        ]);
        let root = g.resolve("a").unwrap();
        let expander = DependencyGraphExpander::new(&g);
        assert_eq!(expander.expand(&root).unwrap(), expander.expand(&root).unwrap());
    }

    #[test]
    fn test_shared_dependency_tags_union() {
        let g = graph(vec![
            formula(
                "a",
                &[dep("b"), dep("c").with_tags([DepTag::Run])],
            ),
            formula("b", &[dep("c").with_tags([DepTag::Build])]),
            formula("c", &[]),
        ]);
        let root = g.resolve("a").unwrap();
        let expansion = DependencyGraphExpander::new(&g).expand(&root).unwrap();

        assert_eq!(names(&expansion), vec!["c", "b", "a"]);
        let c = expansion.get("c").unwrap();
        assert_eq!(c.via_tags, BTreeSet::from([DepTag::Build, DepTag::Run]));
        assert_eq!(c.depth, 2);
    }

    #[test]
    fn test_self_dependency_terminates() {
        let g = graph(vec![formula("a", &[dep("a")])]);
        let root = g.resolve("a").unwrap();
        let expansion = DependencyGraphExpander::new(&g).expand(&root).unwrap();
        assert_eq!(names(&expansion), vec!["a"]);
    }

    #[test]
    fn test_mutual_cycle_terminates() {
        let g = graph(vec![
            formula("a", &[dep("b")]),
            formula("b", &[dep("c")]),
            formula("c", &[dep("a").with_tags([DepTag::Build]), dep("b")]),
        ]);
        let root = g.resolve("a").unwrap();
        let expansion = DependencyGraphExpander::new(&g).expand(&root).unwrap();

        assert_eq!(names(&expansion), vec!["c", "b", "a"]);
        assert!(expansion.get("a").unwrap().via_tags.contains(&DepTag::Build));
    }

    #[test]
    fn test_unresolved() {
        let g = graph(vec![formula("a", &[dep("b")]), formula("b", &[dep("ghost")])]);
        let root = g.resolve("a").unwrap();
        let err = DependencyGraphExpander::new(&g).expand(&root).unwrap_err();
        assert_eq!(
            err,
            ExpandError::Unresolved {
                name: "ghost".into(),
                requested_by: "b".into()
            }
        );
    }

    #[test]
    fn test_filter_skip_and_keep() {
        let g = graph(vec![
            formula("a", &[dep("b"), dep("c")]),
            formula("b", &[dep("d")]),
            formula("c", &[dep("ghost")]),
            formula("d", &[]),
        ]);
        let root = g.resolve("a").unwrap();

        let expansion = DependencyGraphExpander::new(&g)
            .expand_with(&root, |edge: &Edge<'_>, _: &ExpandContext<'_>| match edge.name() {
                "b" => Action::Keep,
                "c" => Action::Skip,
                _ => Action::ExpandAndKeep,
            })
            .unwrap();

        assert_eq!(names(&expansion), vec!["b", "a"]);
    }

    #[test]
    fn test_requirements_before_dependencies() {
        let spec = SoftwareSpec::new("https://example.com/a-1.0.tar.gz")
            .requires(Requirement::new(
                "sh",
                RequirementCheck::Executable("sh".into()),
            ))
            .depends_on(dep("b"));
        let a = Formula::from_definition(FormulaDefinition::new("a").with_spec(Variant::Stable, spec))
            .unwrap();
        let g = graph(vec![a.clone(), formula("b", &[])]);

        let expansion = DependencyGraphExpander::new(&g).expand(&a).unwrap();
        let order: Vec<&str> = expansion.nodes().iter().map(ResolvedNode::name).collect();
        assert_eq!(order, vec!["sh", "b", "a"]);
        assert_eq!(expansion.requirements().count(), 1);
    }

    #[test]
    fn test_unsatisfied_requirements() {
        let spec = SoftwareSpec::new("https://example.com/a-1.0.tar.gz").requires(Requirement::new(
            "plan9",
            RequirementCheck::Platform("plan9".into()),
        ));
        let a = Formula::from_definition(FormulaDefinition::new("a").with_spec(Variant::Stable, spec))
            .unwrap();
        let none = |_: &str| -> Option<Formula> { None };

        let expansion = DependencyGraphExpander::new(&none).expand(&a).unwrap();
        let unmet = expansion.unsatisfied_requirements();
        assert_eq!(unmet.len(), 1);
        assert_eq!(unmet[0].name, "plan9");
    }

    #[test]
    fn test_alias_resolves_to_known_formula() {
        let g = graph(vec![
            formula("a", &[dep("b"), dep("b-alias")]),
            formula("b", &[]),
        ]);
        let aliased = |name: &str| match name {
            "b-alias" => g.resolve("b"),
            other => g.resolve(other),
        };
        let root = g.resolve("a").unwrap();

        let expansion = DependencyGraphExpander::new(&aliased).expand(&root).unwrap();
        assert_eq!(names(&expansion), vec!["b", "a"]);
    }

    #[test]
    fn test_default_filter_options() {
        let g = graph(vec![
            formula(
                "a",
                &[
                    dep("opt").with_tags([DepTag::Optional]),
                    dep("rec").with_tags([DepTag::Recommended]),
                    dep("chk").with_tags([DepTag::Test]),
                    dep("mk").with_tags([DepTag::Build]),
                ],
            ),
            formula("opt", &[]),
            formula("rec", &[]),
            formula("chk", &[]),
            formula("mk", &[]),
        ]);
        let root = g.resolve("a").unwrap();
        let expander = DependencyGraphExpander::new(&g);

        let plain = BuildOptions::new();
        let expansion = expander.expand_with(&root, default_filter(&plain)).unwrap();
        assert_eq!(names(&expansion), vec!["rec", "mk", "a"]);

        let mut custom = BuildOptions::new()
            .with_flag("with-opt")
            .with_flag("without-rec");
        custom.include_test = true;
        let expansion = expander.expand_with(&root, default_filter(&custom)).unwrap();
        assert_eq!(names(&expansion), vec!["opt", "chk", "mk", "a"]);
    }

    #[test]
    fn test_default_filter_skips_build_deps_when_pouring() {
        let spec = SoftwareSpec {
            bottle_available: true,
            ..SoftwareSpec::new("https://example.com/a-1.0.tar.gz")
        }
        .depends_on(dep("mk").with_tags([DepTag::Build]))
        .depends_on(dep("lib"));
        let a = Formula::from_definition(FormulaDefinition::new("a").with_spec(Variant::Stable, spec))
            .unwrap();
        let g = graph(vec![a.clone(), formula("mk", &[]), formula("lib", &[])]);
        let expander = DependencyGraphExpander::new(&g);

        let options = BuildOptions::new();
        let poured = expander.expand_with(&a, default_filter(&options)).unwrap();
        assert_eq!(names(&poured), vec!["lib", "a"]);

        let mut source = BuildOptions::new();
        source.build_from_source = true;
        let built = expander.expand_with(&a, default_filter(&source)).unwrap();
        assert_eq!(names(&built), vec!["mk", "lib", "a"]);
    }

    #[test]
    fn test_first_edge_decides_walk() {
        let g = graph(vec![
            formula("a", &[dep("b"), dep("c")]),
            formula("b", &[dep("d")]),
            formula("c", &[dep("b").with_tags([DepTag::Run])]),
            formula("d", &[]),
        ]);
        let root = g.resolve("a").unwrap();

        let expansion = DependencyGraphExpander::new(&g)
            .expand_with(&root, |edge: &Edge<'_>, ctx: &ExpandContext<'_>| {
                if edge.name() == "b" && ctx.dependent.name() == "a" {
                    Action::Keep
                } else {
                    Action::ExpandAndKeep
                }
            })
            .unwrap();

        assert_eq!(names(&expansion), vec!["b", "c", "a"]);
        assert!(expansion.get("d").is_none());
        assert_eq!(
            expansion.get("b").unwrap().via_tags,
            BTreeSet::from([DepTag::Run])
        );
    }
}
