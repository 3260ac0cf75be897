use relay_core::event::Event;
use relay_macros::event;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

#[event(event_type = "inventory.reserved")]
#[derive(PartialEq, Serialize, Deserialize)]
struct InventoryReserved {
    #[event(id)]
    reservation: Ulid,
    id: u32,
    sku: String,
}

fn main() {
    let reservation = Ulid::new();
    let ev = InventoryReserved {
        reservation,
        id: 7,
        sku: "sku-1".into(),
    };
    assert_eq!(ev.event_id(), Some(reservation.to_string()));
    assert_eq!(ev.clone(), ev);
    assert!(format!("{ev:?}").contains("sku-1"));
}
