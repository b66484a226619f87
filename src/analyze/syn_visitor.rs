//! In-process source analysis with `syn`
//!
//! Walks a parsed file collecting the first segment of every multi-segment
//! path, `use` root and `extern crate`, skipping names that a `use` or
//! `mod` in an enclosing scope has already bound. Bindings are collected
//! for a whole scope before it is walked, since a `use` may follow the
//! code that relies on it.

use super::manifest;
use super::{Analyzer, Hints, ManifestSummary, Reference, SourceSummary, SubmoduleDecl};
use crate::cfg::Predicate;
use crate::error::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use syn::punctuated::Punctuated;
use syn::visit::{self, Visit};
use tracing::warn;

/// Attribute namespace for in-source directives (`#[cratedeps::ignore]`)
const DIRECTIVE_NAMESPACE: &str = "cratedeps";

/// Analyzer backed by `syn`
#[derive(Debug, Clone, Copy, Default)]
pub struct SynAnalyzer;

impl SynAnalyzer {
    pub fn new() -> Self {
        SynAnalyzer
    }

    /// Summarize source text
    pub fn analyze_str(&self, content: &str) -> syn::Result<SourceSummary> {
        let file = syn::parse_file(content)?;
        let mut visitor = ImportVisitor::default();
        visitor.push_scope(bindings_of_items(&file.items));
        for item in &file.items {
            visitor.visit_item(item);
        }
        visitor.pop_scope();
        Ok(visitor.finish())
    }
}

impl Analyzer for SynAnalyzer {
    fn analyze_source(&mut self, path: &Path) -> Result<SourceSummary> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::parse(path, format!("cannot read file: {}", e)))?;
        self.analyze_str(&content)
            .map_err(|e| Error::parse(path, e))
    }

    fn analyze_manifest(&mut self, path: &Path) -> Result<ManifestSummary> {
        manifest::read_manifest(path)
    }
}

#[derive(Debug, Default)]
struct ImportVisitor {
    /// Names in first-seen order, with the OR of their use conditions
    imports: Vec<(String, Predicate)>,
    import_index: HashMap<String, usize>,
    /// Names bound per lexical scope
    scopes: Vec<Vec<String>>,
    /// Active cfg conditions, outermost first
    conditions: Vec<Predicate>,
    submodules: Vec<SubmoduleDecl>,
    aliases: BTreeMap<String, String>,
    hints: Hints,
}

impl ImportVisitor {
    fn finish(self) -> SourceSummary {
        SourceSummary {
            references: self
                .imports
                .into_iter()
                .map(|(name, predicate)| Reference::new(name, predicate))
                .collect(),
            submodules: self.submodules,
            aliases: self.aliases,
            hints: self.hints,
        }
    }

    fn push_scope(&mut self, bound: Vec<String>) {
        self.scopes.push(bound);
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn is_file_scope(&self) -> bool {
        self.scopes.len() == 1
    }

    fn is_bound(&self, name: &str, except: &[String]) -> bool {
        if except.iter().any(|n| n == name) {
            return false;
        }
        self.scopes.iter().any(|s| s.iter().any(|n| n == name))
    }

    fn current_condition(&self) -> Predicate {
        Predicate::all(self.conditions.iter().cloned())
    }

    fn add_import(&mut self, ident: &syn::Ident, except: &[String]) {
        let name = ident.to_string();

        // keywords referring to the current crate
        if matches!(name.as_str(), "crate" | "super" | "self" | "Self") {
            return;
        }
        // types, traits and enum variants
        if name.chars().next().is_some_and(|c| c.is_uppercase()) {
            return;
        }
        if self.is_bound(&name, except) {
            return;
        }

        let condition = self.current_condition();
        match self.import_index.get(&name) {
            Some(&i) => {
                let existing = std::mem::take(&mut self.imports[i].1);
                self.imports[i].1 = existing.or(condition);
            }
            None => {
                self.import_index.insert(name.clone(), self.imports.len());
                self.imports.push((name, condition));
            }
        }
    }

    /// Import the leading segment of every path in a use tree
    fn add_use_roots(&mut self, tree: &syn::UseTree, except: &[String]) {
        match tree {
            syn::UseTree::Path(path) => self.add_import(&path.ident, except),
            syn::UseTree::Name(name) => self.add_import(&name.ident, except),
            syn::UseTree::Rename(rename) => {
                self.add_import(&rename.ident, except);
                if rename.rename != "_" && self.is_file_scope() {
                    self.aliases
                        .insert(rename.ident.to_string(), rename.rename.to_string());
                }
            }
            syn::UseTree::Group(group) => {
                for item in &group.items {
                    self.add_use_roots(item, except);
                }
            }
            syn::UseTree::Glob(_) => {}
        }
    }

    fn derive_imports(&mut self, list: &syn::MetaList) {
        if let Ok(nested) =
            list.parse_args_with(Punctuated::<syn::Path, syn::Token![,]>::parse_terminated)
        {
            for path in nested {
                if path.segments.len() > 1 {
                    self.add_import(&path.segments[0].ident, &[]);
                }
            }
        }
    }

    /// `#[cfg_attr(pred, attr, ...)]`: the inner attributes only apply under
    /// `pred`
    fn cfg_attr_imports(&mut self, list: &syn::MetaList) {
        let Ok(nested) =
            list.parse_args_with(Punctuated::<syn::Meta, syn::Token![,]>::parse_terminated)
        else {
            return;
        };
        let mut metas = nested.into_iter();
        let Some(first) = metas.next() else {
            return;
        };
        let predicate = cfg_predicate(&first);
        self.conditions.push(predicate);
        for meta in metas {
            match &meta {
                syn::Meta::List(inner) if inner.path.is_ident("derive") => {
                    self.derive_imports(inner)
                }
                syn::Meta::List(inner) if inner.path.is_ident("cfg_attr") => {
                    self.cfg_attr_imports(inner)
                }
                other => {
                    let path = other.path();
                    if path.segments.len() > 1 {
                        self.add_import(&path.segments[0].ident, &[]);
                    }
                }
            }
        }
        self.conditions.pop();
    }
}

impl<'ast> Visit<'ast> for ImportVisitor {
    fn visit_item(&mut self, node: &'ast syn::Item) {
        let condition = cfg_of(item_attrs(node));
        self.conditions.push(condition);
        visit::visit_item(self, node);
        self.conditions.pop();
    }

    fn visit_impl_item(&mut self, node: &'ast syn::ImplItem) {
        let attrs: &[syn::Attribute] = match node {
            syn::ImplItem::Const(c) => &c.attrs,
            syn::ImplItem::Fn(f) => &f.attrs,
            syn::ImplItem::Type(t) => &t.attrs,
            syn::ImplItem::Macro(m) => &m.attrs,
            _ => &[],
        };
        self.conditions.push(cfg_of(attrs));
        visit::visit_impl_item(self, node);
        self.conditions.pop();
    }

    fn visit_attribute(&mut self, node: &'ast syn::Attribute) {
        if let syn::Meta::List(list) = &node.meta {
            if list.path.is_ident("derive") {
                self.derive_imports(list);
                return;
            }
            if list.path.is_ident("cfg_attr") {
                self.cfg_attr_imports(list);
                return;
            }
        }
        visit::visit_attribute(self, node);
    }

    fn visit_item_use(&mut self, node: &'ast syn::ItemUse) {
        if has_ignore_directive(&node.attrs) {
            return;
        }
        // a use never refers to a name it binds itself
        let own = bindings_of_use(&node.tree);
        self.add_use_roots(&node.tree, &own);
    }

    fn visit_item_extern_crate(&mut self, node: &'ast syn::ItemExternCrate) {
        if has_ignore_directive(&node.attrs) || node.ident == "self" {
            return;
        }
        let own = [node.ident.to_string()];
        self.add_import(&node.ident, &own);
        if let Some((_, rename)) = &node.rename {
            if rename != "_" {
                self.aliases
                    .insert(node.ident.to_string(), rename.to_string());
            }
        }
    }

    fn visit_item_mod(&mut self, node: &'ast syn::ItemMod) {
        for attr in &node.attrs {
            self.visit_attribute(attr);
        }
        match &node.content {
            None => {
                if self.is_file_scope() {
                    self.submodules.push(SubmoduleDecl {
                        name: node.ident.to_string(),
                        predicate: self.current_condition(),
                        path: path_attr(&node.attrs),
                    });
                }
            }
            Some((_, items)) => {
                self.push_scope(bindings_of_items(items));
                for item in items {
                    self.visit_item(item);
                }
                self.pop_scope();
            }
        }
    }

    fn visit_item_fn(&mut self, node: &'ast syn::ItemFn) {
        let mut is_test = false;
        for attr in &node.attrs {
            let path = attr.path();
            if is_test_attribute(path) {
                is_test = true;
            } else if path.is_ident("proc_macro")
                || path.is_ident("proc_macro_attribute")
                || path.is_ident("proc_macro_derive")
            {
                self.hints.has_proc_macro = true;
            }
        }
        if self.is_file_scope() && node.sig.ident == "main" {
            self.hints.has_main = true;
        }
        if is_test {
            self.hints.has_test = true;
            self.conditions.push(Predicate::flag("test"));
        }
        visit::visit_item_fn(self, node);
        if is_test {
            self.conditions.pop();
        }
    }

    fn visit_block(&mut self, node: &'ast syn::Block) {
        let items: Vec<&syn::Item> = node
            .stmts
            .iter()
            .filter_map(|stmt| match stmt {
                syn::Stmt::Item(item) => Some(item),
                _ => None,
            })
            .collect();
        self.push_scope(items.into_iter().flat_map(bindings_of_item).collect());
        visit::visit_block(self, node);
        self.pop_scope();
    }

    fn visit_path(&mut self, node: &'ast syn::Path) {
        if node.segments.len() > 1 {
            self.add_import(&node.segments[0].ident, &[]);
        }
        visit::visit_path(self, node);
    }

    fn visit_macro(&mut self, node: &'ast syn::Macro) {
        visit::visit_macro(self, node);
        if node.path.is_ident("macro_rules") {
            return;
        }
        // most macro invocations take expression arguments
        if let Ok(args) =
            node.parse_body_with(Punctuated::<syn::Expr, syn::Token![,]>::parse_terminated)
        {
            for arg in &args {
                self.visit_expr(arg);
            }
        }
    }
}

fn item_attrs(item: &syn::Item) -> &[syn::Attribute] {
    match item {
        syn::Item::Const(i) => &i.attrs,
        syn::Item::Enum(i) => &i.attrs,
        syn::Item::ExternCrate(i) => &i.attrs,
        syn::Item::Fn(i) => &i.attrs,
        syn::Item::ForeignMod(i) => &i.attrs,
        syn::Item::Impl(i) => &i.attrs,
        syn::Item::Macro(i) => &i.attrs,
        syn::Item::Mod(i) => &i.attrs,
        syn::Item::Static(i) => &i.attrs,
        syn::Item::Struct(i) => &i.attrs,
        syn::Item::Trait(i) => &i.attrs,
        syn::Item::TraitAlias(i) => &i.attrs,
        syn::Item::Type(i) => &i.attrs,
        syn::Item::Union(i) => &i.attrs,
        syn::Item::Use(i) => &i.attrs,
        _ => &[],
    }
}

/// Conjunction of every `#[cfg(...)]` on an item
fn cfg_of(attrs: &[syn::Attribute]) -> Predicate {
    Predicate::all(attrs.iter().filter_map(|attr| match &attr.meta {
        syn::Meta::List(list) if list.path.is_ident("cfg") => {
            Some(match list.parse_args::<syn::Meta>() {
                Ok(meta) => cfg_predicate(&meta),
                Err(e) => {
                    warn!(cfg = %list.tokens, error = %e, "unparseable cfg, assuming true");
                    Predicate::True
                }
            })
        }
        _ => None,
    }))
}

fn cfg_predicate(meta: &syn::Meta) -> Predicate {
    Predicate::from_meta(meta).unwrap_or_else(|e| {
        warn!(error = %e, "unsupported cfg predicate, assuming true");
        Predicate::True
    })
}

/// `#[test]`, `#[tokio::test]`, `#[tokio::test(flavor = "...")]`, ...
fn is_test_attribute(path: &syn::Path) -> bool {
    path.segments.last().is_some_and(|seg| seg.ident == "test")
}

fn has_ignore_directive(attrs: &[syn::Attribute]) -> bool {
    attrs.iter().any(|attr| {
        let path = attr.path();
        if path.segments.len() != 2 || path.segments[0].ident != DIRECTIVE_NAMESPACE {
            return false;
        }
        if path.segments[1].ident == "ignore" {
            true
        } else {
            warn!(directive = %path.segments[1].ident, "unknown directive");
            false
        }
    })
}

fn path_attr(attrs: &[syn::Attribute]) -> Option<String> {
    attrs.iter().find_map(|attr| match &attr.meta {
        syn::Meta::NameValue(nv) if nv.path.is_ident("path") => match &nv.value {
            syn::Expr::Lit(syn::ExprLit {
                lit: syn::Lit::Str(s),
                ..
            }) => Some(s.value()),
            _ => None,
        },
        _ => None,
    })
}

fn bindings_of_items(items: &[syn::Item]) -> Vec<String> {
    items.iter().flat_map(bindings_of_item).collect()
}

/// Names an item brings into its enclosing scope that could shadow a crate
fn bindings_of_item(item: &syn::Item) -> Vec<String> {
    match item {
        syn::Item::Use(u) => bindings_of_use(&u.tree),
        syn::Item::Mod(m) => vec![m.ident.to_string()],
        syn::Item::ExternCrate(c) => match &c.rename {
            Some((_, rename)) => vec![rename.to_string()],
            None => vec![c.ident.to_string()],
        },
        _ => Vec::new(),
    }
}

fn bindings_of_use(tree: &syn::UseTree) -> Vec<String> {
    let mut out = Vec::new();
    collect_use_bindings(tree, None, &mut out);
    out
}

fn collect_use_bindings(tree: &syn::UseTree, parent: Option<&syn::Ident>, out: &mut Vec<String>) {
    match tree {
        syn::UseTree::Path(path) => collect_use_bindings(&path.tree, Some(&path.ident), out),
        syn::UseTree::Name(name) => {
            if name.ident == "self" {
                // `x::y::{self}` binds `y`
                if let Some(parent) = parent {
                    out.push(parent.to_string());
                }
            } else {
                out.push(name.ident.to_string());
            }
        }
        syn::UseTree::Rename(rename) => {
            if rename.rename != "_" {
                out.push(rename.rename.to_string());
            }
        }
        syn::UseTree::Group(group) => {
            for item in &group.items {
                collect_use_bindings(item, parent, out);
            }
        }
        syn::UseTree::Glob(_) => {}
    }
}
