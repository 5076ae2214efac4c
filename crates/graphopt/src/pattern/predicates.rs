//! Reusable predicates for [`PatternBuilder::predicate`](super::PatternBuilder::predicate).

use crate::graph::{Graph, OutputRef};
use crate::rt_info;
use crate::tensor::ElementType;

pub fn any(graph: &Graph, value: OutputRef) -> bool {
    let _ = (graph, value);
    true
}

pub fn is_constant(graph: &Graph, value: OutputRef) -> bool {
    graph
        .node(value.node)
        .is_some_and(|node| node.op().is_constant())
}

pub fn has_static_shape(graph: &Graph, value: OutputRef) -> bool {
    graph
        .spec_of(value)
        .is_some_and(|spec| spec.shape.static_dims().is_some())
}

pub fn has_single_consumer(graph: &Graph, value: OutputRef) -> bool {
    graph.consumers(value).len() == 1
}

pub fn constant_folding_allowed(graph: &Graph, value: OutputRef) -> bool {
    graph
        .node(value.node)
        .is_some_and(|node| !rt_info::constant_folding_is_disabled(node.rt_info()))
}

pub fn kind_is(kind: &'static str) -> impl Fn(&Graph, OutputRef) -> bool + Send + Sync {
    move |graph, value| graph.node(value.node).is_some_and(|node| node.kind() == kind)
}

pub fn consumers_count(count: usize) -> impl Fn(&Graph, OutputRef) -> bool + Send + Sync {
    move |graph, value| graph.consumers(value).len() == count
}

pub fn rank_equals(rank: usize) -> impl Fn(&Graph, OutputRef) -> bool + Send + Sync {
    move |graph, value| {
        graph
            .spec_of(value)
            .is_some_and(|spec| spec.shape.rank() == Some(rank))
    }
}

pub fn element_type_is(element_type: ElementType) -> impl Fn(&Graph, OutputRef) -> bool + Send + Sync {
    move |graph, value| {
        graph
            .spec_of(value)
            .is_some_and(|spec| spec.element_type == element_type)
    }
}
