use relay_core::event::Event;
use relay_macros::event;

#[event(event_type = "order.placed")]
struct OrderPlaced {
    id: String,
    amount: u64,
}

fn main() {
    let ev = OrderPlaced {
        id: "o-1".into(),
        amount: 10,
    };
    assert_eq!(OrderPlaced::EVENT_TYPE, "order.placed");
    assert_eq!(ev.event_id().as_deref(), Some("o-1"));
    let _ = ev.clone();
}
