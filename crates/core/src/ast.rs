//! tree-sitter AST parsing for precise symbol extraction, feature-gated
//! behind `treesitter`. Used both directly (`astmatch`/`astcontains` stage
//! kernels) and as the substrate the Python scope resolver (`py_scope.rs`)
//! and the `libcst`/`jedi` stage substitutes build on, since Rust has no
//! embedded Python analyzer to reach for instead.

use rayon::prelude::*;
use std::collections::HashMap;
use tracing::debug;
use tree_sitter::{Language, Node, Parser};

use crate::walker::WalkedFile;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

/// The kind of a code symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Function,
    Method,
    Class,
    Struct,
    Enum,
    Interface,
    Trait,
    Impl,
    TypeAlias,
    Constant,
}

impl SymbolKind {
    pub fn label(&self) -> &'static str {
        match self {
            SymbolKind::Function => "fn",
            SymbolKind::Method => "method",
            SymbolKind::Class => "class",
            SymbolKind::Struct => "struct",
            SymbolKind::Enum => "enum",
            SymbolKind::Interface => "interface",
            SymbolKind::Trait => "trait",
            SymbolKind::Impl => "impl",
            SymbolKind::TypeAlias => "type",
            SymbolKind::Constant => "const",
        }
    }
}

/// A single extracted symbol with its location and metadata.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
    /// 1-based start line.
    pub start_line: usize,
    /// 1-based end line (inclusive).
    pub end_line: usize,
    /// Index of parent symbol (e.g., method's class/impl), or None for top-level.
    pub parent_idx: Option<usize>,
    /// One-line display signature (e.g., "def foo(x):").
    pub signature: String,
}

/// All symbols extracted from a single file.
#[derive(Debug, Clone)]
pub struct FileAst {
    pub symbols: Vec<Symbol>,
    /// Name → indices into `symbols` for fast lookup.
    pub name_index: HashMap<String, Vec<usize>>,
}

impl FileAst {
    fn new() -> Self {
        FileAst { symbols: Vec::new(), name_index: HashMap::new() }
    }

    fn push(&mut self, sym: Symbol) {
        let idx = self.symbols.len();
        self.name_index.entry(sym.name.clone()).or_default().push(idx);
        self.symbols.push(sym);
    }

    /// Look up symbols by name.
    pub fn find(&self, name: &str) -> Vec<&Symbol> {
        self.name_index.get(name).map(|indices| indices.iter().map(|&i| &self.symbols[i]).collect()).unwrap_or_default()
    }

    /// The smallest def/class/function/method symbol whose range contains
    /// `line` (1-based), used for Python scope widening and symbol-at-line
    /// lookups (§4.E step 4, §4.G callgraph resolution).
    pub fn smallest_enclosing(&self, line: usize) -> Option<&Symbol> {
        self.symbols
            .iter()
            .filter(|s| {
                s.start_line <= line
                    && line <= s.end_line
                    && matches!(s.kind, SymbolKind::Function | SymbolKind::Method | SymbolKind::Class)
            })
            .min_by_key(|s| s.end_line - s.start_line)
    }
}

/// Per-file AST index for the entire repository.
pub type AstIndex = HashMap<String, FileAst>;

// ---------------------------------------------------------------------------
// Language resolution
// ---------------------------------------------------------------------------

/// Map a file extension to the tree-sitter Language.
fn language_for_ext(ext: &str) -> Option<Language> {
    match ext {
        "rs" => Some(tree_sitter_rust::LANGUAGE.into()),
        "ts" | "tsx" => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
        "js" | "jsx" | "mjs" | "cjs" => Some(tree_sitter_javascript::LANGUAGE.into()),
        "py" | "pyi" => Some(tree_sitter_python::LANGUAGE.into()),
        "go" => Some(tree_sitter_go::LANGUAGE.into()),
        "c" | "h" => Some(tree_sitter_c::LANGUAGE.into()),
        "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx" => Some(tree_sitter_cpp::LANGUAGE.into()),
        "java" => Some(tree_sitter_java::LANGUAGE.into()),
        _ => None,
    }
}

/// True when `ext` is parsed with the Python grammar — used throughout this
/// crate to gate Python-only behavior (scope widening, symbol lookup,
/// `pyast`/`pyflow`/`pydef` stages).
pub fn is_python(ext: &str) -> bool {
    matches!(ext, "py" | "pyi")
}

fn is_rust(ext: &str) -> bool {
    ext == "rs"
}
fn is_c_cpp(ext: &str) -> bool {
    matches!(ext, "c" | "h" | "cpp" | "cc" | "cxx" | "hpp" | "hh" | "hxx")
}
fn is_go(ext: &str) -> bool {
    ext == "go"
}

// ---------------------------------------------------------------------------
// Symbol extraction
// ---------------------------------------------------------------------------

fn classify_node(kind: &str, _ext: &str) -> Option<SymbolKind> {
    match kind {
        "function_item" => Some(SymbolKind::Function),
        "struct_item" => Some(SymbolKind::Struct),
        "enum_item" => Some(SymbolKind::Enum),
        "trait_item" => Some(SymbolKind::Trait),
        "impl_item" => Some(SymbolKind::Impl),
        "type_item" => Some(SymbolKind::TypeAlias),
        "const_item" => Some(SymbolKind::Constant),
        "static_item" => Some(SymbolKind::Constant),

        "function_declaration" => Some(SymbolKind::Function),
        "class_declaration" => Some(SymbolKind::Class),
        "interface_declaration" => Some(SymbolKind::Interface),
        "type_alias_declaration" => Some(SymbolKind::TypeAlias),
        "method_definition" => Some(SymbolKind::Method),
        "export_statement" => None,

        "function_definition" => Some(SymbolKind::Function),
        "class_definition" => Some(SymbolKind::Class),

        "method_declaration" => Some(SymbolKind::Method),
        "type_declaration" => None,
        "type_spec" => Some(SymbolKind::TypeAlias),

        "struct_specifier" => Some(SymbolKind::Struct),
        "enum_specifier" => Some(SymbolKind::Enum),
        "class_specifier" => Some(SymbolKind::Class),

        "enum_declaration" => Some(SymbolKind::Enum),

        _ => None,
    }
}

fn extract_name<'a>(node: &Node<'a>, source: &'a [u8], ext: &str) -> Option<String> {
    for field in &["name", "type"] {
        if let Some(name_node) = node.child_by_field_name(*field) {
            if let Ok(text) = name_node.utf8_text(source) {
                let name = text.trim().to_string();
                if !name.is_empty() {
                    return Some(name);
                }
            }
        }
    }

    if node.kind() == "impl_item" && is_rust(ext) {
        if let Some(type_node) = node.child_by_field_name("type") {
            if let Ok(text) = type_node.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }

    if node.kind() == "type_spec" && is_go(ext) {
        if let Some(child) = node.named_child(0) {
            if let Ok(text) = child.utf8_text(source) {
                return Some(text.trim().to_string());
            }
        }
    }

    if (node.kind() == "function_definition" && is_c_cpp(ext)) || node.kind() == "function_item" {
        if let Some(decl) = node.child_by_field_name("declarator") {
            if let Some(name_node) = decl.child_by_field_name("declarator") {
                if let Ok(text) = name_node.utf8_text(source) {
                    return Some(text.trim().to_string());
                }
            }
            if let Ok(text) = decl.utf8_text(source) {
                let s = text.trim();
                if let Some(paren) = s.find('(') {
                    return Some(s[..paren].trim().to_string());
                }
                return Some(s.to_string());
            }
        }
    }

    None
}

fn extract_signature(node: &Node, source: &[u8], ext: &str) -> String {
    let text = node.utf8_text(source).unwrap_or("");
    let first_line = text.lines().next().unwrap_or("").trim();

    let sig = if is_python(ext) {
        if let Some(colon) = first_line.find(':') {
            &first_line[..=colon]
        } else {
            first_line
        }
    } else if let Some(brace) = first_line.find('{') {
        first_line[..brace].trim()
    } else {
        first_line
    };

    if sig.len() > 200 {
        let cut = sig.char_indices().map(|(i, _)| i).take_while(|&i| i <= 200).last().unwrap_or(0);
        format!("{}...", &sig[..cut])
    } else {
        sig.to_string()
    }
}

fn walk_node(node: &Node, source: &[u8], ext: &str, parent_idx: Option<usize>, file_ast: &mut FileAst) {
    let kind = node.kind();

    if let Some(sym_kind) = classify_node(kind, ext) {
        let name = extract_name(node, source, ext).unwrap_or_default();
        let start_line = node.start_position().row + 1;
        let end_line = node.end_position().row + 1;
        let signature = extract_signature(node, source, ext);

        let final_kind = if parent_idx.is_some() && matches!(sym_kind, SymbolKind::Function) && !is_go(ext) {
            SymbolKind::Method
        } else {
            sym_kind
        };

        let sym = Symbol { name, kind: final_kind, start_line, end_line, parent_idx, signature };
        let my_idx = file_ast.symbols.len();
        file_ast.push(sym);

        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_node(&child, source, ext, Some(my_idx), file_ast);
        }
    } else {
        let mut cursor = node.walk();
        for child in node.children(&mut cursor) {
            walk_node(&child, source, ext, parent_idx, file_ast);
        }
    }
}

/// Parse a single file and extract its AST symbols. Returns `None` if the
/// file's language isn't supported or parsing fails.
pub fn parse_file(content: &str, ext: &str) -> Option<FileAst> {
    let lang = language_for_ext(ext)?;
    let mut parser = Parser::new();
    parser.set_language(&lang).ok()?;

    let tree = parser.parse(content, None)?;
    let root = tree.root_node();

    let mut file_ast = FileAst::new();
    let source = content.as_bytes();

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        walk_node(&child, source, ext, None, &mut file_ast);
    }

    if file_ast.symbols.is_empty() {
        None
    } else {
        Some(file_ast)
    }
}

// ---------------------------------------------------------------------------
// Index building
// ---------------------------------------------------------------------------

/// Build an AST index for all supported walked files in parallel.
pub fn build_ast_index(files: &[WalkedFile]) -> AstIndex {
    let start = std::time::Instant::now();

    let results: Vec<(String, FileAst)> = files
        .par_iter()
        .filter_map(|file| {
            let ext = file.abs_path.extension().and_then(|e| e.to_str()).unwrap_or("");
            let content = std::fs::read_to_string(&file.abs_path).ok()?;
            let ast = parse_file(&content, ext)?;
            Some((file.rel_path.clone(), ast))
        })
        .collect();

    let count = results.len();
    let total_symbols: usize = results.iter().map(|(_, ast)| ast.symbols.len()).sum();
    let index: AstIndex = results.into_iter().collect();

    debug!(files = count, symbols = total_symbols, time_ms = start.elapsed().as_millis() as u64, "AST index built");

    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_python_function_and_class() {
        let src = "def foo(x):\n    return x + 1\n\nclass Bar:\n    def method(self):\n        pass\n";
        let ast = parse_file(src, "py").expect("python should parse");
        assert!(ast.find("foo").iter().any(|s| s.kind == SymbolKind::Function));
        assert!(ast.find("Bar").iter().any(|s| s.kind == SymbolKind::Class));
        assert!(ast.find("method").iter().any(|s| s.kind == SymbolKind::Method));
    }

    #[test]
    fn smallest_enclosing_picks_innermost_scope() {
        let src = "class Bar:\n    def method(self):\n        return 1\n";
        let ast = parse_file(src, "py").unwrap();
        let enclosing = ast.smallest_enclosing(3).unwrap();
        assert_eq!(enclosing.name, "method");
    }

    #[test]
    fn unsupported_extension_returns_none() {
        assert!(parse_file("whatever", "xyz123").is_none());
    }
}
