//! Procedural macros for reed's macro-engine primitives.
//!
//! Provides the `#[primitive]` attribute for defining macro-runtime
//! primitives (spec.md §4.2/§6) with rustdoc-style documentation that is
//! automatically converted to help entries and table-registration code.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Attribute, ItemFn, Meta};

#[derive(Debug, Clone)]
#[allow(dead_code)]
struct DocMarkdown {
    summary: String,
    examples: Vec<String>,
    see_also: Vec<String>,
    full_markdown: String,
}

fn extract_doc_comments(attrs: &[Attribute]) -> String {
    attrs
        .iter()
        .filter_map(|attr| {
            if attr.path().is_ident("doc") {
                if let Meta::NameValue(nv) = &attr.meta {
                    if let syn::Expr::Lit(syn::ExprLit {
                        lit: syn::Lit::Str(lit_str),
                        ..
                    }) = &nv.value
                    {
                        return Some(lit_str.value());
                    }
                }
            }
            None
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn parse_doc_markdown(raw_doc: &str) -> DocMarkdown {
    let mut summary = String::new();
    let mut examples = Vec::new();
    let mut see_also = Vec::new();
    let mut current_section = "summary";
    let mut current_content = String::new();

    fn flush(section: &str, content: &str, summary: &mut String, examples: &mut Vec<String>, see_also: &mut Vec<String>) {
        match section {
            "summary" => *summary = content.trim().to_string(),
            "examples" => {
                for code_block in content.split("```") {
                    let trimmed_block = code_block.trim();
                    if let Some(code_str) = trimmed_block.strip_prefix("lisp") {
                        let code = code_str.trim().to_string();
                        if !code.is_empty() {
                            examples.push(code);
                        }
                    }
                }
            }
            "see also" => {
                *see_also = content
                    .trim()
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
            }
            _ => {}
        }
    }

    for line in raw_doc.lines() {
        let trimmed = line.trim();
        if let Some(rest) = trimmed.strip_prefix("# ") {
            flush(current_section, &current_content, &mut summary, &mut examples, &mut see_also);
            let header = rest.trim().to_lowercase();
            current_section = if header.contains("example") {
                "examples"
            } else if header.contains("see") || header.contains("related") {
                "see also"
            } else {
                "other"
            };
            current_content.clear();
        } else {
            current_content.push_str(line);
            current_content.push('\n');
        }
    }
    flush(current_section, &current_content, &mut summary, &mut examples, &mut see_also);

    DocMarkdown {
        summary,
        examples,
        see_also,
        full_markdown: raw_doc.to_string(),
    }
}

/// Parse `#[primitive(...)]` arguments: `name = "...", category = "...", related(...)`.
fn parse_primitive_args(attr_stream: TokenStream) -> (String, String, Vec<String>) {
    let attr_str = attr_stream.to_string();
    let mut name = String::new();
    let mut category = String::new();
    let mut related = Vec::new();

    if let Some(start) = attr_str.find("name = \"") {
        let rest = &attr_str[start + 8..];
        if let Some(end) = rest.find('"') {
            name = rest[..end].to_string();
        }
    }
    if let Some(start) = attr_str.find("category = \"") {
        let rest = &attr_str[start + 12..];
        if let Some(end) = rest.find('"') {
            category = rest[..end].to_string();
        }
    }
    if let Some(start) = attr_str.find("related") {
        let rest = &attr_str[start..];
        if let (Some(paren_start), Some(paren_end)) = (rest.find('('), rest.find(')')) {
            let related_str = &rest[paren_start + 1..paren_end];
            related = related_str
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
        }
    }
    (name, category, related)
}

/// Attribute macro for defining macro-runtime primitives (spec.md §4.2).
///
/// Extracts rustdoc comments and generates both the function and a
/// registration function that inserts it into a [`PrimitiveTable`] and
/// registers its help documentation.
///
/// # Example
///
/// ```ignore
/// #[primitive(name = "+", category = "Arithmetic", related(sub, mul, div))]
/// /// Returns the sum of all arguments.
/// pub fn add(args: &[Form]) -> Result<Form, RuntimeError> {
///     // ...
/// }
/// ```
#[proc_macro_attribute]
pub fn primitive(attr: TokenStream, item: TokenStream) -> TokenStream {
    let func = parse_macro_input!(item as ItemFn);

    let (lisp_name, category, related) = parse_primitive_args(attr);

    let fn_name = func.sig.ident.clone();
    let fn_ident_str = fn_name.to_string();

    let name_to_use = if !lisp_name.is_empty() { lisp_name } else { fn_ident_str.clone() };

    let raw_docs = extract_doc_comments(&func.attrs);
    let parsed_docs = parse_doc_markdown(&raw_docs);

    let description = if !parsed_docs.summary.is_empty() {
        parsed_docs.summary.clone()
    } else {
        parsed_docs.full_markdown.clone()
    };

    let register_fn_name = quote::format_ident!("register_{}", fn_name);
    let help_fn_name = quote::format_ident!("register_help_{}", fn_name);
    let examples = parsed_docs.examples.clone();
    let related_vec = related;
    let cat_to_use = if !category.is_empty() { category.clone() } else { "Other".to_string() };
    let signature = format!("({} ...)", name_to_use);

    let expanded = quote! {
        #func

        #[allow(dead_code)]
        pub fn #register_fn_name(table: &mut crate::macroexpand::primitives::PrimitiveTable) {
            table.insert(#name_to_use, #fn_name);
        }

        #[allow(dead_code)]
        pub fn #help_fn_name() {
            crate::help::register_help(crate::help::HelpEntry {
                name: #name_to_use.to_string(),
                signature: #signature.to_string(),
                description: #description.to_string(),
                examples: vec![#(#examples.to_string()),*],
                related: vec![#(#related_vec.to_string()),*],
                category: #cat_to_use.to_string(),
            });
        }
    };

    TokenStream::from(expanded)
}
