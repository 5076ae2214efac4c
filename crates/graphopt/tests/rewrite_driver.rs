use graphopt::graph::{Graph, GraphError, NodeId};
use graphopt::optimizer::OptimizeError;
use graphopt::ops::{Add, Parameter, Relu};
use graphopt::pattern::{Match, Pattern};
use graphopt::rewrite::{
    apply_rules_greedily, Diagnostic, FnRule, GraphRewriter, GreedyConfig, PassState,
    RewriteAction, RuleSet,
};
use graphopt::rt_info::{self, RtValue};
use graphopt::tensor::{ElementType, Shape, TensorSpec};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn parameter(graph: &mut Graph) -> NodeId {
    let spec = TensorSpec::new(ElementType::F32, Shape::from_static(&[4]));
    graph.add_node(Parameter::new(spec), &[]).unwrap()
}

fn relu_chain(graph: &mut Graph, length: usize) -> (NodeId, NodeId) {
    let input = parameter(graph);
    let mut last = input;
    for _ in 0..length {
        last = graph.add_node(Relu, &[last.output(0)]).unwrap();
    }
    graph.add_result(last.output(0)).unwrap();
    (input, last)
}

fn config(max_iterations: usize) -> GreedyConfig {
    GreedyConfig {
        max_iterations,
        enable_dce: true,
    }
}

/// `Relu(Relu(x))` with the inner Relu labelled.
fn double_relu() -> Pattern {
    let mut b = Pattern::builder();
    let x = b.wildcard();
    let inner = b.op("Relu", [x]);
    let inner = b.label("inner", inner);
    let root = b.op("Relu", [inner]);
    b.finish(root).unwrap()
}

fn single_relu() -> Pattern {
    let mut b = Pattern::builder();
    let x = b.wildcard();
    let root = b.op("Relu", [x]);
    b.finish(root).unwrap()
}

#[test]
fn idempotent_relu_chain_collapses() {
    init_logging();
    let mut graph = Graph::new();
    let (input, _) = relu_chain(&mut graph, 4);

    let mut rules = RuleSet::new();
    rules.add(FnRule::new(
        "collapse-double-relu",
        double_relu(),
        |matched: &Match, _rw: &mut GraphRewriter<'_>| RewriteAction::Replace {
            old: matched.root().node,
            outputs: vec![matched.get("inner").expect("inner is labelled")],
        },
    ));
    let report = apply_rules_greedily(&mut graph, &rules.freeze(), &config(8));

    assert_eq!(report.state, PassState::Converged);
    assert!(report.converged());
    assert_eq!(report.applied, 3);
    assert_eq!(report.iterations, 2);
    assert!(report.diagnostics.is_empty());
    assert_eq!(graph.len(), 2);
    let survivor = graph.results()[0].node;
    assert_eq!(graph.node(survivor).unwrap().kind(), "Relu");
    assert_eq!(graph.source_of(survivor.input(0)), Some(input.output(0)));
}

#[test]
fn failed_replacement_rolls_back_and_records_diagnostic() {
    init_logging();
    let mut graph = Graph::new();
    let a = parameter(&mut graph);
    let b = parameter(&mut graph);
    let sum = graph.add_node(Add, &[a.output(0), b.output(0)]).unwrap();
    graph.add_result(sum.output(0)).unwrap();
    let (nodes, edges) = (graph.len(), graph.edge_count());

    let mut pattern = Pattern::builder();
    let lhs = pattern.wildcard();
    let rhs = pattern.wildcard();
    let root = pattern.op("Add", [lhs, rhs]);
    let pattern = pattern.finish(root).unwrap();

    let mut rules = RuleSet::new();
    rules.add(FnRule::new(
        "split-add",
        pattern,
        |matched: &Match, rw: &mut GraphRewriter<'_>| {
            let old = matched.root().node;
            let sources: Vec<_> = rw
                .graph()
                .node(old)
                .map(|node| node.inputs().iter().map(|input| input.source()).collect())
                .unwrap_or_default();
            let fresh = rw.add_node(Relu, &sources[..1]).expect("relu builds");
            // Two outputs for a single-output node.
            RewriteAction::Replace {
                old,
                outputs: vec![fresh.output(0), sources[1]],
            }
        },
    ));
    let report = apply_rules_greedily(&mut graph, &rules.freeze(), &config(4));

    assert_eq!(report.state, PassState::Converged);
    assert_eq!(report.applied, 0);
    assert_eq!(
        report.diagnostics,
        vec![Diagnostic::ReplacementFailed {
            rule: "split-add".to_string(),
            node: sum,
            error: GraphError::PortCountMismatch {
                expected: 1,
                actual: 2,
            },
        }]
    );
    assert_eq!((graph.len(), graph.edge_count()), (nodes, edges));
    assert_eq!(graph.results(), &[sum.output(0)]);
    assert!(graph.topologically_valid());
}

#[test]
fn rejected_and_unchanged_matches_leave_no_trace() {
    let mut graph = Graph::new();
    let (_, last) = relu_chain(&mut graph, 2);
    let before = graph.node_ids();

    let mut rules = RuleSet::new();
    rules.add(FnRule::new(
        "veto",
        single_relu(),
        |matched: &Match, rw: &mut GraphRewriter<'_>| {
            let _ = rw.add_node(Relu, &[matched.root()]);
            RewriteAction::Reject
        },
    ));
    let report = apply_rules_greedily(&mut graph, &rules.freeze(), &config(4));
    assert_eq!(report.rejected, 2);
    assert_eq!(report.state, PassState::Converged);
    assert_eq!(graph.node_ids(), before);
    assert_eq!(graph.results(), &[last.output(0)]);

    let mut rules = RuleSet::new();
    rules.add(FnRule::new(
        "observe",
        single_relu(),
        |_: &Match, _: &mut GraphRewriter<'_>| RewriteAction::NoChange,
    ));
    let report = apply_rules_greedily(&mut graph, &rules.freeze(), &config(4));
    assert!(!report.changed());
    assert_eq!(graph.node_ids(), before);
}

#[test]
fn non_converging_rules_exhaust_the_budget() {
    init_logging();
    let mut graph = Graph::new();
    relu_chain(&mut graph, 1);

    let mut rules = RuleSet::new();
    rules.add(FnRule::new(
        "rebuild-relu",
        single_relu(),
        |matched: &Match, rw: &mut GraphRewriter<'_>| {
            let old = matched.root().node;
            let Some(source) = rw.graph().source_of(old.input(0)) else {
                return RewriteAction::NoChange;
            };
            match rw.add_node(Relu, &[source]) {
                Ok(fresh) => RewriteAction::Replace {
                    old,
                    outputs: vec![fresh.output(0)],
                },
                Err(_) => RewriteAction::NoChange,
            }
        },
    ));
    let report = apply_rules_greedily(&mut graph, &rules.freeze(), &config(3));

    assert_eq!(report.state, PassState::BudgetExhausted);
    assert_eq!(report.iterations, 3);
    assert_eq!(report.applied, 3);
    assert_eq!(
        report.check_converged("rebuild"),
        Err(OptimizeError::BudgetExhausted {
            pass: "rebuild".to_string(),
            iterations: 3,
        })
    );
    assert!(matches!(
        report.diagnostics.as_slice(),
        [Diagnostic::BudgetExhausted { iterations: 3, .. }]
    ));
    // The last valid graph is kept.
    assert_eq!(graph.len(), 2);
    assert!(graph.topologically_valid());
}

#[test]
fn rewriter_only_edits_nodes_it_created() {
    let mut graph = Graph::new();
    let p = parameter(&mut graph);
    let mut rw = GraphRewriter::new(&mut graph);

    assert!(matches!(rw.rt_info_mut(p), Err(GraphError::Frozen { node }) if node == p));
    assert_eq!(
        rw.disable_constant_folding(p),
        Err(GraphError::Frozen { node: p })
    );

    let fresh = rw.add_node(Relu, &[p.output(0)]).unwrap();
    rw.rt_info_mut(fresh)
        .unwrap()
        .insert("origin", RtValue::String("rewrite".into()));
    rw.disable_constant_folding(fresh).unwrap();
    rw.set_name(fresh, "relu_rewritten").unwrap();

    let node = graph.node(fresh).unwrap();
    assert_eq!(node.name(), "relu_rewritten");
    assert!(rt_info::constant_folding_is_disabled(node.rt_info()));
    assert!(!rt_info::constant_folding_is_disabled(graph.node(p).unwrap().rt_info()));
}

#[test]
fn rules_are_indexed_by_root_kind() {
    let mut any = Pattern::builder();
    let root = any.wildcard();
    let any = any.finish(root).unwrap();

    let mut rules = RuleSet::new();
    rules
        .add(FnRule::new(
            "relu-only",
            single_relu(),
            |_: &Match, _: &mut GraphRewriter<'_>| RewriteAction::NoChange,
        ))
        .add(FnRule::new(
            "anything",
            any,
            |_: &Match, _: &mut GraphRewriter<'_>| RewriteAction::NoChange,
        ));
    let frozen = rules.freeze();

    let names = |kind: &str| -> Vec<String> {
        frozen
            .matching(kind)
            .map(|(_, rule)| rule.name().to_string())
            .collect()
    };
    assert_eq!(names("Relu"), vec!["relu-only", "anything"]);
    assert_eq!(names("Add"), vec!["anything"]);
}

#[test]
fn first_matching_rule_wins_per_anchor() {
    let mut graph = Graph::new();
    relu_chain(&mut graph, 2);

    let mut rules = RuleSet::new();
    rules
        .add(FnRule::new(
            "decline",
            double_relu(),
            |_: &Match, _: &mut GraphRewriter<'_>| RewriteAction::Reject,
        ))
        .add(FnRule::new(
            "collapse",
            double_relu(),
            |matched: &Match, _: &mut GraphRewriter<'_>| RewriteAction::Replace {
                old: matched.root().node,
                outputs: vec![matched.get("inner").expect("inner is labelled")],
            },
        ));
    let report = apply_rules_greedily(&mut graph, &rules.freeze(), &config(4));

    assert_eq!(report.applied, 0);
    assert_eq!(report.rejected, 1);
    assert_eq!(graph.len(), 3);
}

#[test]
fn zero_sweep_budget_still_runs_one_sweep() {
    let mut graph = Graph::new();
    let (_, last) = relu_chain(&mut graph, 2);

    let mut rules = RuleSet::new();
    rules.add(FnRule::new(
        "observe",
        single_relu(),
        |_: &Match, _: &mut GraphRewriter<'_>| RewriteAction::NoChange,
    ));
    let report = apply_rules_greedily(&mut graph, &rules.freeze(), &config(0));

    assert_eq!(report.state, PassState::Converged);
    assert_eq!(report.iterations, 1);
    assert!(report.diagnostics.is_empty());
    assert_eq!(graph.len(), 3);
    assert_eq!(graph.results(), &[last.output(0)]);
}
