//! Python scope widening (§4.E step 4, `EMBED_PROJECT_ALWAYS_FULL_PY_SCOPE`):
//! given a hit line in a `.py` file, expand the snippet to cover the smallest
//! enclosing `def`/`class` body instead of a fixed-size window around the
//! line. Built on top of `ast::FileAst` rather than a bespoke Python walker
//! — `FileAst.smallest_enclosing` already carries the start/end/kind data a
//! scope resolver needs, so there's no reason to parse twice.

use crate::ast::{self, SymbolKind};

/// `(start_line, end_line)` of the smallest enclosing function/method/class
/// body containing `line` (1-based, inclusive), or `None` if no enclosing
/// symbol is found (e.g. module-level code, or parsing failed).
pub fn find_python_scope(source: &str, line: usize) -> Option<(usize, usize)> {
    let file_ast = ast::parse_file(source, "py")?;
    let sym = file_ast.smallest_enclosing(line)?;
    Some((sym.start_line, sym.end_line))
}

/// The name and kind label of the symbol at `line`, for snippet headers
/// (e.g. `[pkg/a.py:1-2 def foo]`).
pub fn get_python_symbol_at_line(source: &str, line: usize) -> Option<(String, &'static str)> {
    let file_ast = ast::parse_file(source, "py")?;
    let sym = file_ast.smallest_enclosing(line)?;
    let label = match sym.kind {
        SymbolKind::Function | SymbolKind::Method => "def",
        SymbolKind::Class => "class",
        _ => sym.kind.label(),
    };
    Some((sym.name.clone(), label))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = "def foo(x):\n    return x + 1\n\n\nclass Bar:\n    def method(self):\n        return 2\n";

    #[test]
    fn widens_to_whole_function_body() {
        let (start, end) = find_python_scope(SRC, 2).unwrap();
        assert_eq!((start, end), (1, 2));
    }

    #[test]
    fn widens_to_method_not_enclosing_class() {
        let (start, end) = find_python_scope(SRC, 7).unwrap();
        assert_eq!((start, end), (6, 7));
    }

    #[test]
    fn symbol_at_line_reports_def_label() {
        let (name, label) = get_python_symbol_at_line(SRC, 2).unwrap();
        assert_eq!(name, "foo");
        assert_eq!(label, "def");
    }

    #[test]
    fn no_enclosing_scope_for_blank_line() {
        assert!(find_python_scope(SRC, 3).is_none());
    }
}
