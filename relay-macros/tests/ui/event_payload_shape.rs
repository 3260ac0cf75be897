use relay_core::event::Event;
use relay_macros::event;

// 事件类型与持久化载荷的形态
#[event(event_type = "payment.captured")]
struct PaymentCaptured {
    id: u64,
    cents: i64,
}

fn main() {
    let ev: PaymentCaptured = serde_json::from_str(r#"{"id":42,"cents":1999}"#).unwrap();
    assert_eq!(ev.cents, 1999);
    assert_eq!(ev.event_id().as_deref(), Some("42"));
    assert_eq!(ev.event_type(), "payment.captured");
    assert_eq!(serde_json::to_string(&ev).unwrap(), r#"{"id":42,"cents":1999}"#);
}
