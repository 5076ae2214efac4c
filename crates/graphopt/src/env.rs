use std::env;
use std::sync::OnceLock;

static GRAPHOPT_MAX_ITERS: OnceLock<usize> = OnceLock::new();
static GRAPHOPT_FIXED_POINT_ITERS: OnceLock<usize> = OnceLock::new();
static GRAPHOPT_PASS_STATS: OnceLock<bool> = OnceLock::new();

const DEFAULT_MAX_ITERS: usize = 16;
const DEFAULT_FIXED_POINT_ITERS: usize = 4;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_count(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => match value.trim().parse::<usize>() {
            Ok(count) if count > 0 => count,
            _ => {
                log::warn!("ignoring invalid {name}={value:?}, using {default}");
                default
            }
        },
        _ => default,
    }
}

/// Sweep budget of one greedy rewrite pass.
pub(crate) fn max_rewrite_iters() -> usize {
    *GRAPHOPT_MAX_ITERS.get_or_init(|| parse_count("GRAPHOPT_MAX_ITERS", DEFAULT_MAX_ITERS))
}

/// Iteration budget of a pipeline fixed-point group.
pub(crate) fn fixed_point_iters() -> usize {
    *GRAPHOPT_FIXED_POINT_ITERS
        .get_or_init(|| parse_count("GRAPHOPT_FIXED_POINT_ITERS", DEFAULT_FIXED_POINT_ITERS))
}

pub(crate) fn pass_stats_enabled() -> bool {
    *GRAPHOPT_PASS_STATS.get_or_init(|| match env::var("GRAPHOPT_PASS_STATS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}
