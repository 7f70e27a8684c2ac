//! Stage kernels (§4.C): ~19 independent `(query, k, deadline) -> Vec<Hit>`
//! functions, listed here as data rather than as a trait hierarchy so the
//! orchestrator can group, order, and budget them uniformly (§9 redesign
//! note: "data-driven dispatch table, not a stage trait object per kernel").

pub mod common;
pub mod fuzzy_stage;
pub mod lexical;
pub mod structural;
pub mod vector;

use crate::deadline::Deadline;
use crate::types::Hit;

use self::common::StageContext;

pub type StageFn = fn(&StageContext, &str, usize, &Deadline) -> Vec<Hit>;

/// One row of the stage table: name, score ceiling (informational, the
/// kernel enforces it itself), and the function pointer.
#[derive(Clone, Copy)]
pub struct StageSpec {
    pub name: &'static str,
    pub score_ceiling: f64,
    pub run: StageFn,
}

/// The full stage table, in the order §4.D's short-circuit mode walks it.
/// Exhaustive mode partitions this same table into concurrent groups (see
/// `orchestrator::STAGE_GROUPS`) rather than maintaining a second list.
pub static ALL_STAGES: &[StageSpec] = &[
    StageSpec { name: "tokenmatch", score_ceiling: 0.999, run: lexical::tokenmatch },
    StageSpec { name: "lineexact", score_ceiling: 0.998, run: lexical::lineexact },
    StageSpec { name: "literal", score_ceiling: 0.997, run: lexical::literal },
    StageSpec { name: "openbuffer", score_ceiling: 0.9965, run: lexical::openbuffer },
    StageSpec { name: "astmatch", score_ceiling: 0.999, run: structural::astmatch },
    StageSpec { name: "astcontains", score_ceiling: 0.998, run: structural::astcontains },
    StageSpec { name: "rapidfuzz", score_ceiling: 0.986, run: fuzzy_stage::rapidfuzz },
    StageSpec { name: "cooccur", score_ceiling: 0.998, run: lexical::cooccur },
    StageSpec { name: "pyast", score_ceiling: 0.995, run: structural::pyast },
    StageSpec { name: "pydoc", score_ceiling: 0.991, run: structural::pydoc },
    StageSpec { name: "pyliterals", score_ceiling: 0.9915, run: structural::pyliterals },
    StageSpec { name: "pyflow", score_ceiling: 0.9935, run: structural::pyflow },
    StageSpec { name: "libcst", score_ceiling: 0.9933, run: structural::libcst },
    StageSpec { name: "jedi", score_ceiling: 0.992, run: structural::jedi },
    StageSpec { name: "regex_fuzzy", score_ceiling: 0.993, run: lexical::regex_fuzzy },
    StageSpec { name: "textscan", score_ceiling: 0.99, run: lexical::textscan },
    StageSpec { name: "exact", score_ceiling: 0.95, run: lexical::exact },
    StageSpec { name: "keyword", score_ceiling: 0.38, run: lexical::keyword },
    StageSpec { name: "traceback", score_ceiling: 0.996, run: lexical::traceback },
    StageSpec { name: "pydef", score_ceiling: 0.9931, run: structural::pydef },
    StageSpec { name: "vector", score_ceiling: 0.9, run: vector::vector },
];

pub fn find_stage(name: &str) -> Option<&'static StageSpec> {
    ALL_STAGES.iter().find(|s| s.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_stage_name_is_unique() {
        let mut names: Vec<&str> = ALL_STAGES.iter().map(|s| s.name).collect();
        names.sort();
        let mut deduped = names.clone();
        deduped.dedup();
        assert_eq!(names.len(), deduped.len());
    }

    #[test]
    fn find_stage_resolves_known_names() {
        assert!(find_stage("tokenmatch").is_some());
        assert!(find_stage("nonexistent").is_none());
    }

    #[test]
    fn vector_stage_is_registered_in_the_dispatch_table() {
        assert!(find_stage("vector").is_some());
    }
}
