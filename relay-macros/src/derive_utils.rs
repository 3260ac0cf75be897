use quote::ToTokens;
use syn::punctuated::Punctuated;
use syn::{Attribute, Path, Token};

/// 把 `required` 合并进已有的 `#[derive(...)]`
///
/// 全部 derive 收拢为一条属性并置于最前；`Serialize` 与 `serde::Serialize`
/// 视为同一项，`required` 优先。
pub(crate) fn apply_derives(attrs: &mut Vec<Attribute>, required: Vec<Path>) -> syn::Result<()> {
    let mut existing: Vec<Path> = Vec::new();
    let mut retained: Vec<Attribute> = Vec::new();

    for attr in attrs.drain(..) {
        if attr.path().is_ident("derive") {
            let list = attr.parse_args_with(Punctuated::<Path, Token![,]>::parse_terminated)?;
            existing.extend(list);
        } else {
            retained.push(attr);
        }
    }

    let mut keys = std::collections::HashSet::new();
    let merged: Vec<Path> = required
        .into_iter()
        .chain(existing)
        .filter(|p| keys.insert(derive_key(p)))
        .collect();

    attrs.push(syn::parse_quote!(#[derive(#(#merged),*)]));
    attrs.extend(retained);
    Ok(())
}

fn derive_key(p: &Path) -> String {
    match p.segments.last() {
        Some(last) => last.ident.to_string(),
        None => p.to_token_stream().to_string(),
    }
}
