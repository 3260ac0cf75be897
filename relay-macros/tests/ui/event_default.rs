use relay_core::event::Event;
use relay_macros::event;

#[event]
struct Heartbeat {
    seq: u32,
}

fn main() {
    let ev = Heartbeat { seq: 1 };
    assert_eq!(Heartbeat::EVENT_TYPE, "Heartbeat");
    assert_eq!(ev.event_id(), None);
    assert_eq!(ev.seq, 1);
}
