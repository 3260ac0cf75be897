//! relay 过程宏
//!
//! - `#[event]`：为事件载荷结构体合并派生并实现 `relay_core::event::Event`
//!
use proc_macro::TokenStream;

mod derive_utils;
mod event;

/// 事件宏
///
/// ```ignore
/// #[event(event_type = "order.placed")]
/// struct OrderPlaced {
///     id: String,
///     amount: u64,
/// }
/// ```
///
/// 支持键值形式：
/// - #[event(event_type = "...")] 指定持久化时写入的事件类型（默认结构体名）
/// - 字段上的 #[event(id)] 指定事件标识（默认名为 `id` 的字段）
#[proc_macro_attribute]
pub fn event(attr: TokenStream, item: TokenStream) -> TokenStream {
    event::expand(attr, item)
}
