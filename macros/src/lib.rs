extern crate proc_macro;

use proc_macro::TokenStream;
use std::collections::BTreeMap;

use proc_macro2::Span;
use quote::quote;
use syn::{
    braced,
    parse::{self, Parse, ParseStream},
    parse_macro_input,
    punctuated::Punctuated,
    token, Ident, LitBool, LitInt, Token,
};

/// Declares the `static` scratch storage a [`circular_log::Log`] needs, sized from a compile-time
/// geometry literal.
///
/// ```ignore
/// circular_log_macros::circular_log! {
///     EVENT_LOG {
///         length: 0x2000,
///         sector: 0x1000,
///         program_unit: 0x100,
///         max_date_len: 32,
///         index: true,
///     }
/// }
/// ```
///
/// expands to a `work_buf` array sized `program_unit + max_date_len` bytes and, when `index` is
/// `true`, an `IndexEntry` array with one slot per sector, both named after the given identifier.
#[proc_macro]
pub fn circular_log(input: TokenStream) -> TokenStream {
    match expand(parse_macro_input!(input as Input)) {
        Ok(ts) => ts,
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: Input) -> parse::Result<TokenStream> {
    let mut fields = BTreeMap::new();
    for kv in &input.map {
        let key = kv.key.to_string();
        if fields.contains_key(&key) {
            return Err(parse::Error::new(kv.key.span(), "field appears more than once"));
        }
        fields.insert(key, kv.clone());
    }

    let length = require_int(&fields, "length", input.name.span())?;
    let sector = require_int(&fields, "sector", input.name.span())?;
    let program_unit = require_int(&fields, "program_unit", input.name.span())?;
    let max_date_len = require_int(&fields, "max_date_len", input.name.span())?;
    let build_index = fields
        .get("index")
        .map(|kv| match &kv.value {
            Value::Bool(b) => Ok(b.value),
            Value::Int(lit) => Err(parse::Error::new(lit.span(), "`index` must be a bool literal")),
        })
        .transpose()?
        .unwrap_or(false);

    if sector == 0 || length % sector != 0 {
        return Err(parse::Error::new(
            input.name.span(),
            "`length` must be a positive multiple of `sector`",
        ));
    }
    if program_unit == 0 || sector % program_unit != 0 {
        return Err(parse::Error::new(
            input.name.span(),
            "`sector` must be a positive multiple of `program_unit`",
        ));
    }
    if max_date_len >= program_unit {
        return Err(parse::Error::new(
            input.name.span(),
            "`max_date_len` must be smaller than `program_unit`",
        ));
    }

    let name = &input.name;
    let work_buf_ident = Ident::new(&format!("{}_WORK_BUF", name), Span::call_site());
    let work_buf_len = (program_unit + max_date_len) as usize;

    let work_buf_decl = quote!(
        static mut #work_buf_ident: [u8; #work_buf_len] = [0xFFu8; #work_buf_len];
    );

    let index_decl = if build_index {
        let sector_count = (length / sector) as usize;
        let index_ident = Ident::new(&format!("{}_INDEX", name), Span::call_site());
        quote!(
            static mut #index_ident: [circular_log::IndexEntry; #sector_count] =
                [circular_log::IndexEntry::EMPTY; #sector_count];
        )
    } else {
        quote!()
    };

    Ok(quote!(
        #work_buf_decl
        #index_decl
    )
    .into())
}

fn require_int(fields: &BTreeMap<String, KeyValue>, key: &str, fallback_span: Span) -> parse::Result<u32> {
    let kv = fields
        .get(key)
        .ok_or_else(|| parse::Error::new(fallback_span, format!("missing required field `{}`", key)))?;
    match &kv.value {
        Value::Int(lit) => lit.base10_parse(),
        Value::Bool(_) => Err(parse::Error::new(kv.key.span(), format!("`{}` must be an integer literal", key))),
    }
}

struct Input {
    name: Ident,
    _brace: token::Brace,
    map: Punctuated<KeyValue, Token![,]>,
}

impl Parse for Input {
    fn parse(input: ParseStream) -> parse::Result<Self> {
        let content;
        Ok(Self {
            name: input.parse()?,
            _brace: braced!(content in input),
            map: Punctuated::parse_terminated(&content)?,
        })
    }
}

#[derive(Clone)]
struct KeyValue {
    key: Ident,
    _colon: Token![:],
    value: Value,
}

impl Parse for KeyValue {
    fn parse(input: ParseStream) -> parse::Result<Self> {
        Ok(Self {
            key: input.parse()?,
            _colon: input.parse()?,
            value: input.parse()?,
        })
    }
}

#[derive(Clone)]
enum Value {
    Int(LitInt),
    Bool(LitBool),
}

impl Parse for Value {
    fn parse(input: ParseStream) -> parse::Result<Self> {
        if input.peek(LitBool) {
            Ok(Value::Bool(input.parse()?))
        } else {
            Ok(Value::Int(input.parse()?))
        }
    }
}
