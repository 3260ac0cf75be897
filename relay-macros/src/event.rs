use crate::derive_utils::apply_derives;
use proc_macro::TokenStream;
use quote::quote;
use syn::parse::{Parse, ParseStream};
use syn::punctuated::Punctuated;
use syn::spanned::Spanned;
use syn::{Expr, Fields, Ident, Item, Result, Token, parse_macro_input};

/// #[event] 宏实现
/// - 仅支持具名字段结构体
/// - 合并派生：Debug, Clone, serde::Serialize, serde::Deserialize
/// - 生成 `::relay_core::event::Event` 实现（EVENT_TYPE / event_id）
/// - 事件标识：标注 `#[event(id)]` 的字段，否则名为 `id` 的字段；都没有时不提供
pub(crate) fn expand(attr: TokenStream, item: TokenStream) -> TokenStream {
    let cfg = parse_macro_input!(attr as EventAttrConfig);
    let mut input = parse_macro_input!(item as Item);

    match expand_struct(cfg, &mut input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn expand_struct(cfg: EventAttrConfig, input: &mut Item) -> Result<proc_macro2::TokenStream> {
    let item_struct = match input {
        Item::Struct(s) => s,
        other => {
            return Err(syn::Error::new(
                other.span(),
                "#[event] can only be used on struct types",
            ));
        }
    };

    let fields = match &mut item_struct.fields {
        Fields::Named(named) => named,
        other => {
            return Err(syn::Error::new(
                other.span(),
                "#[event] supports only named-field structs, e.g., struct X { a: T }",
            ));
        }
    };

    let mut marked: Option<Ident> = None;
    for field in fields.named.iter_mut() {
        let mut retained = Vec::with_capacity(field.attrs.len());
        for attr in field.attrs.drain(..) {
            if !attr.path().is_ident("event") {
                retained.push(attr);
                continue;
            }

            let key: Ident = attr.parse_args()?;
            if key != "id" {
                return Err(syn::Error::new(key.span(), "unknown key; expected 'id'"));
            }
            if marked.is_some() {
                return Err(syn::Error::new(
                    attr.span(),
                    "duplicate #[event(id)]; only one field can be the identity",
                ));
            }
            marked = field.ident.clone();
        }
        field.attrs = retained;
    }

    let id_field = marked.or_else(|| {
        fields
            .named
            .iter()
            .filter_map(|f| f.ident.clone())
            .find(|i| i == "id")
    });

    let required: Vec<syn::Path> = vec![
        syn::parse_quote!(Debug),
        syn::parse_quote!(Clone),
        syn::parse_quote!(serde::Serialize),
        syn::parse_quote!(serde::Deserialize),
    ];
    apply_derives(&mut item_struct.attrs, required)?;

    let ident = &item_struct.ident;
    let event_type = cfg
        .event_type
        .unwrap_or_else(|| syn::LitStr::new(&ident.to_string(), ident.span()));
    let (impl_generics, ty_generics, where_clause) = item_struct.generics.split_for_impl();

    let event_id = id_field.map(|id| {
        quote! {
            fn event_id(&self) -> ::core::option::Option<::std::string::String> {
                ::core::option::Option::Some(::std::string::ToString::to_string(&self.#id))
            }
        }
    });

    Ok(quote! {
        #item_struct

        impl #impl_generics ::relay_core::event::Event for #ident #ty_generics #where_clause {
            const EVENT_TYPE: &'static str = #event_type;

            #event_id
        }
    })
}

// 结构体级配置：事件类型名（缺省为结构体名）
struct EventAttrConfig {
    event_type: Option<syn::LitStr>,
}

impl Parse for EventAttrConfig {
    fn parse(input: ParseStream) -> Result<Self> {
        let mut event_type: Option<syn::LitStr> = None;

        let pairs = Punctuated::<syn::ExprAssign, Token![,]>::parse_terminated(input)?;
        for assign in pairs {
            let key = match *assign.left {
                Expr::Path(p) if p.path.segments.len() == 1 => p.path.segments[0].ident.clone(),
                other => return Err(syn::Error::new(other.span(), "invalid attribute key")),
            };

            match key.to_string().as_str() {
                "event_type" => {
                    if event_type.is_some() {
                        return Err(syn::Error::new(
                            key.span(),
                            "duplicate key 'event_type' in attribute",
                        ));
                    }
                    event_type = match *assign.right {
                        Expr::Lit(syn::ExprLit {
                            lit: syn::Lit::Str(lit),
                            ..
                        }) => Some(lit),
                        other => {
                            return Err(syn::Error::new(
                                other.span(),
                                "expected string literal for 'event_type'",
                            ));
                        }
                    };
                }
                _ => {
                    return Err(syn::Error::new(
                        key.span(),
                        "unknown key; expected 'event_type'",
                    ));
                }
            }
        }

        Ok(Self { event_type })
    }
}
