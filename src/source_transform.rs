// Copyright 2025 Martin Pool

//! Source Transformer (component C1): locate, extract, empty, and replace
//! function and class bodies in Python source while preserving signatures,
//! decorators, and docstrings.
//!
//! Design decision, carried over from the teacher's `textedit.rs`: operate
//! on line ranges derived from AST spans rather than rewriting the AST, so
//! comments and surrounding whitespace survive verbatim.

use anyhow::{bail, Context, Result};
use rustpython_parser::ast::{self, Ranged};
use rustpython_parser::{parse, Mode};

use crate::path::TreeRelativePathBuf;
use crate::target::{Target, TargetKind};
use crate::textedit::{indent_column_of_line, left_pad, reindent, replace_region, LineColumn, Span};

/// The placeholder token used in signature hints shown to the model.
pub const HINT_PLACEHOLDER: &str = "... your code goes here ...";

/// The default replacement body used by [`empty_function`].
pub const DEFAULT_EMPTY_BODY: &str = "raise NotImplementedError";

/// A located function (or method) definition, with enough span information
/// to empty, replace, or hint it without re-parsing.
#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub target: Target,
    /// Span of the whole definition, from the first decorator (or `def`) to
    /// the end of the body.
    pub whole_span: Span,
    /// Start of the region after any decorators, i.e. the `def`/`async def`
    /// keyword itself.
    pub signature_start: LineColumn,
    pub body_start: LineColumn,
    pub body_end: LineColumn,
    /// End of the docstring statement, if the first body statement is a
    /// bare string literal.
    pub docstring_end: Option<LineColumn>,
    pub indent_column: usize,
}

/// A located class definition and its methods, in source order.
#[derive(Debug, Clone)]
pub struct ClassDef {
    pub target: Target,
    pub whole_span: Span,
    pub signature_start: LineColumn,
    pub methods: Vec<FunctionDef>,
}

/// Parse `source` and return every top-level and nested function/class
/// definition found in it.
pub fn parse_definitions(source: &str) -> Result<(Vec<FunctionDef>, Vec<ClassDef>)> {
    let module = match parse(source, Mode::Module, "<module>").context("parse python source")? {
        ast::Mod::Module(m) => m,
        other => bail!("expected a module, got {other:?}"),
    };
    let mut functions = Vec::new();
    let mut classes = Vec::new();
    collect_from_body(&module.body, source, &mut functions, &mut classes);
    Ok((functions, classes))
}

fn collect_from_body(
    body: &[ast::Stmt],
    source: &str,
    functions: &mut Vec<FunctionDef>,
    classes: &mut Vec<ClassDef>,
) {
    for stmt in body {
        match stmt {
            ast::Stmt::FunctionDef(f) => {
                functions.push(function_def(&f.name, &f.decorator_list, &f.body, stmt.range(), source));
                collect_from_body(&f.body, source, functions, classes);
            }
            ast::Stmt::AsyncFunctionDef(f) => {
                functions.push(function_def(&f.name, &f.decorator_list, &f.body, stmt.range(), source));
                collect_from_body(&f.body, source, functions, classes);
            }
            ast::Stmt::ClassDef(c) => {
                let methods = c
                    .body
                    .iter()
                    .filter_map(|s| match s {
                        ast::Stmt::FunctionDef(f) => {
                            Some(function_def(&f.name, &f.decorator_list, &f.body, s.range(), source))
                        }
                        ast::Stmt::AsyncFunctionDef(f) => {
                            Some(function_def(&f.name, &f.decorator_list, &f.body, s.range(), source))
                        }
                        _ => None,
                    })
                    .collect();
                let decorator_start = c
                    .decorator_list
                    .first()
                    .map(|d| offset_to_lc(source, d.range().start().to_usize()))
                    .unwrap_or_else(|| offset_to_lc(source, stmt.range().start().to_usize()));
                classes.push(ClassDef {
                    target: Target::new(
                        TreeRelativePathBuf::new(camino::Utf8PathBuf::new()),
                        TargetKind::Class,
                        c.name.to_string(),
                        Span::from_byte_range(
                            source,
                            stmt.range().start().to_usize(),
                            stmt.range().end().to_usize(),
                        ),
                    ),
                    whole_span: Span::from_byte_range(
                        source,
                        stmt.range().start().to_usize(),
                        stmt.range().end().to_usize(),
                    ),
                    signature_start: decorator_start,
                    methods,
                });
                collect_from_body(&c.body, source, functions, classes);
            }
            _ => {}
        }
    }
}

fn function_def(
    name: &str,
    decorator_list: &[ast::Expr],
    body: &[ast::Stmt],
    whole_range: ast::TextRange,
    source: &str,
) -> FunctionDef {
    let whole_span = Span::from_byte_range(source, whole_range.start().to_usize(), whole_range.end().to_usize());
    let signature_start = decorator_list
        .first()
        .map(|d| offset_to_lc(source, d.range().start().to_usize()))
        .unwrap_or(whole_span.start);
    let first = body.first().expect("function body is never empty");
    let last = body.last().expect("function body is never empty");
    let body_start = offset_to_lc(source, first.range().start().to_usize());
    let body_end = offset_to_lc(source, last.range().end().to_usize());
    let docstring_end = docstring_range(first, source);
    let indent_column = indent_column_of_line(source, body_start.line);
    FunctionDef {
        target: Target::new(
            TreeRelativePathBuf::new(camino::Utf8PathBuf::new()),
            TargetKind::Function,
            name.to_owned(),
            whole_span,
        ),
        whole_span,
        signature_start,
        body_start,
        body_end,
        docstring_end,
        indent_column,
    }
}

fn docstring_range(first_stmt: &ast::Stmt, source: &str) -> Option<LineColumn> {
    let ast::Stmt::Expr(expr_stmt) = first_stmt else {
        return None;
    };
    if matches!(
        expr_stmt.value.as_ref(),
        ast::Expr::Constant(c) if matches!(c.value, ast::Constant::Str(_))
    ) {
        Some(offset_to_lc(source, expr_stmt.range().end().to_usize()))
    } else {
        None
    }
}

fn offset_to_lc(source: &str, offset: usize) -> LineColumn {
    LineColumn::from_byte_offset(source, offset)
}

/// Attach `relative_path` to every target inside `fd`/`cd`, since the parser
/// itself has no notion of which file it was reading.
pub fn with_path(mut fd: FunctionDef, relative_path: &TreeRelativePathBuf) -> FunctionDef {
    fd.target.relative_path = relative_path.clone();
    fd
}

pub fn class_with_path(mut cd: ClassDef, relative_path: &TreeRelativePathBuf) -> ClassDef {
    cd.target.relative_path = relative_path.clone();
    cd.methods = cd
        .methods
        .into_iter()
        .map(|m| with_path(m, relative_path))
        .collect();
    cd
}

/// Replace `fd`'s body with `body`, starting *after* any docstring and
/// preserving the indentation of the first body statement's column.
pub fn empty_function(text: &str, fd: &FunctionDef, body: &str) -> String {
    let start = fd.docstring_end.unwrap_or(fd.body_start);
    let replacement = format!("\n{}", reindent(body, fd.indent_column));
    replace_region(text, &start_after(start), &fd.body_end, &replacement)
}

/// Replace `fd`'s implementation with `new_impl`. When `preserve_docstring`
/// is true and a docstring is present, only the post-docstring region is
/// replaced; `new_impl` is re-indented to the body's column either way.
pub fn replace_function(text: &str, fd: &FunctionDef, new_impl: &str, preserve_docstring: bool) -> String {
    let start = if preserve_docstring {
        fd.docstring_end.unwrap_or(fd.body_start)
    } else {
        fd.body_start
    };
    let replacement = format!("\n{}", reindent(new_impl, fd.indent_column));
    replace_region(text, &start_after(start), &fd.body_end, &replacement)
}

/// Apply [`empty_function`] to every method of `cd`, in reverse source
/// order, so that line numbers of earlier methods remain valid while later
/// ones are rewritten.
pub fn empty_class(text: &str, cd: &ClassDef, body: &str) -> String {
    let mut text = text.to_owned();
    for method in cd.methods.iter().rev() {
        text = empty_function(&text, method, body);
    }
    text
}

/// Per-method hinting helper for [`hint_class`]: replace each method's
/// implementation with `new_impl`, decorator-aware, as the replaced span
/// begins at the first decorator. Not used for splicing a model reply back
/// in, since that reply is a single reimplementation of the whole class —
/// see [`replace_class_body`] for that.
fn replace_class(text: &str, cd: &ClassDef, new_impl: &str, preserve_docstring: bool) -> String {
    let mut text = text.to_owned();
    for method in cd.methods.iter().rev() {
        text = replace_function(&text, method, new_impl, preserve_docstring);
    }
    text
}

/// Replace the whole class definition — from its first decorator (or the
/// `class` keyword itself) through its last line — with `new_impl`, which is
/// expected to be a complete reimplementation of the class (signature,
/// docstring, and all methods). Left-padded to the class's own column
/// rather than re-indented: `new_impl` already has its own multi-level
/// structure (method defs nested under the class, statements nested under
/// each method) that a flat re-indent would destroy.
pub fn replace_class_body(text: &str, cd: &ClassDef, new_impl: &str) -> String {
    let replacement = left_pad(new_impl.trim(), cd.signature_start.column);
    replace_region(text, &cd.signature_start, &cd.whole_span.end, &replacement)
}

/// Return the signature-only form of `fd`, body replaced by
/// [`HINT_PLACEHOLDER`], used as the model's target template.
pub fn hint_function(text: &str, fd: &FunctionDef) -> String {
    replace_function(text, fd, HINT_PLACEHOLDER, true)
}

/// Return the signature-only form of every method in `cd`.
pub fn hint_class(text: &str, cd: &ClassDef) -> String {
    replace_class(text, cd, HINT_PLACEHOLDER, true)
}

/// A `LineColumn` one past `lc`, used because `replace_region`'s start
/// bound is inclusive and the docstring's end offset already points just
/// after its closing quote.
fn start_after(lc: LineColumn) -> LineColumn {
    LineColumn {
        line: lc.line,
        column: lc.column + 1,
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn empty_function_preserves_docstring_and_indent() {
        let source = "def f(x):\n    \"\"\"doc.\"\"\"\n    return x + 1\n";
        let (functions, _) = parse_definitions(source).unwrap();
        let f = &functions[0];
        assert!(f.docstring_end.is_some());
        let emptied = empty_function(source, f, DEFAULT_EMPTY_BODY);
        assert_eq!(emptied, "def f(x):\n    \"\"\"doc.\"\"\"\n    raise NotImplementedError\n");
    }

    #[test]
    fn empty_function_without_docstring() {
        let source = "def f(x):\n    return x + 1\n";
        let (functions, _) = parse_definitions(source).unwrap();
        let emptied = empty_function(source, &functions[0], DEFAULT_EMPTY_BODY);
        assert_eq!(emptied, "def f(x):\n    raise NotImplementedError\n");
    }

    #[test]
    fn hint_function_uses_placeholder() {
        let source = "def f(x):\n    return x + 1\n";
        let (functions, _) = parse_definitions(source).unwrap();
        let hinted = hint_function(source, &functions[0]);
        assert!(hinted.contains(HINT_PLACEHOLDER));
    }

    #[test]
    fn empty_class_rewrites_all_methods_in_reverse_order() {
        let source = "class C:\n    def a(self):\n        return 1\n\n    def b(self):\n        return 2\n";
        let (_, classes) = parse_definitions(source).unwrap();
        let c = &classes[0];
        assert_eq!(c.methods.len(), 2);
        let emptied = empty_class(source, c, DEFAULT_EMPTY_BODY);
        assert!(emptied.contains("def a(self):\n        raise NotImplementedError"));
        assert!(emptied.contains("def b(self):\n        raise NotImplementedError"));
    }

    #[test]
    fn replace_class_body_swaps_whole_class_once_for_multi_method_class() {
        let source = "class C:\n    def a(self):\n        return 1\n\n    def b(self):\n        return 2\n";
        let (_, classes) = parse_definitions(source).unwrap();
        let c = &classes[0];
        assert_eq!(c.methods.len(), 2);
        let new_impl = "class C:\n    def a(self):\n        return 10";
        let replaced = replace_class_body(source, c, new_impl);
        assert_eq!(replaced, format!("{new_impl}\n"));
        // Exactly one reimplementation, not one per original method.
        assert_eq!(replaced.matches("class C:").count(), 1);
    }

    #[test]
    fn hint_class_still_places_one_placeholder_per_method() {
        let source = "class C:\n    def a(self):\n        return 1\n\n    def b(self):\n        return 2\n";
        let (_, classes) = parse_definitions(source).unwrap();
        let hinted = hint_class(source, &classes[0]);
        assert_eq!(hinted.matches(HINT_PLACEHOLDER).count(), 2);
    }

    #[test]
    fn nested_function_is_collected() {
        let source = "def outer():\n    def inner():\n        return 1\n    return inner()\n";
        let (functions, _) = parse_definitions(source).unwrap();
        assert!(functions.iter().any(|f| f.target.name == "inner"));
        assert!(functions.iter().any(|f| f.target.name == "outer"));
    }
}
