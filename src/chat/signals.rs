//! Advisory events that never touch storage: role-wide announcements,
//! notifications aimed at one user, and keepalive.

use serde_json::{Map, Value};

use crate::{
    auth::Role,
    error::{ChatError, ChatResult},
    gateway::{Connection, Gateway, OutboundEvent, PongPayload},
    now_ms,
    rooms::RoomKey,
    GetField,
};

/// Announcements relayed to everyone holding the sender's role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleSignal {
    CarInquiry,
    LotUpdate,
    InspectionUpdate,
    TransportUpdate,
}

impl RoleSignal {
    pub fn role(self) -> Role {
        match self {
            RoleSignal::CarInquiry => Role::Seller,
            RoleSignal::LotUpdate => Role::Dealer,
            RoleSignal::InspectionUpdate => Role::Mechanic,
            RoleSignal::TransportUpdate => Role::Towing,
        }
    }

    pub fn event(self) -> &'static str {
        match self {
            RoleSignal::CarInquiry => "new_car_inquiry",
            RoleSignal::LotUpdate => "lot_updated",
            RoleSignal::InspectionUpdate => "inspection_updated",
            RoleSignal::TransportUpdate => "transport_request_updated",
        }
    }

    /// Field the sender's id is stamped into.
    fn sender_field(self) -> &'static str {
        match self {
            RoleSignal::CarInquiry => "sellerId",
            RoleSignal::LotUpdate => "dealerId",
            RoleSignal::InspectionUpdate => "mechanicId",
            RoleSignal::TransportUpdate => "towingServiceId",
        }
    }
}

/// Notifications addressed to a single user's personal room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Bid,
    Offer,
    Reservation,
}

impl Notice {
    pub fn event(self) -> &'static str {
        match self {
            Notice::Bid => "new_bid_notification",
            Notice::Offer => "new_offer_notification",
            Notice::Reservation => "new_reservation_notification",
        }
    }

    fn target_field(self) -> &'static str {
        match self {
            Notice::Bid | Notice::Reservation => "carOwnerId",
            Notice::Offer => "sellerId",
        }
    }

    fn data_field(self) -> &'static str {
        match self {
            Notice::Bid => "bidData",
            Notice::Offer => "offerData",
            Notice::Reservation => "reservationData",
        }
    }

    /// Names of the fields carrying the sender's display name and role.
    fn sender_fields(self) -> (&'static str, &'static str) {
        match self {
            Notice::Bid => ("bidderName", "bidderRole"),
            Notice::Offer => ("buyerName", "buyerRole"),
            Notice::Reservation => ("customerName", "customerRole"),
        }
    }
}

fn into_object(data: Value) -> ChatResult<Map<String, Value>> {
    match data {
        Value::Object(object) => Ok(object),
        Value::Null => Ok(Map::new()),
        other => Err(ChatError::MalformedPayload(format!(
            "expected an object, got {other}"
        ))),
    }
}

/// Relays `data` to the signal's role room, the sender included. Only a
/// connection holding that role may send it.
pub fn role_signal(
    gateway: &Gateway,
    connection: &Connection,
    signal: RoleSignal,
    data: Value,
) -> ChatResult<()> {
    let identity = connection.identity();
    if identity.role != signal.role() {
        return Err(ChatError::Forbidden(format!(
            "only a {} can send {}",
            signal.role(),
            signal.event()
        )));
    }

    let mut data = into_object(data)?;
    data.insert(signal.sender_field().into(), identity.user_id.clone().into());
    data.insert("senderName".into(), identity.display_name.clone().into());

    let reached = gateway.emit_to_role(signal.role(), signal.event(), Value::Object(data));
    tracing::debug!(
        connection_id = %connection.id(),
        user_id = %identity.user_id,
        room = %RoomKey::Role(signal.role()),
        event = signal.event(),
        reached,
        "role signal relayed"
    );

    Ok(())
}

/// Forwards the nested notice data to its target user with the sender's
/// name and role attached.
pub fn notify(
    gateway: &Gateway,
    connection: &Connection,
    notice: Notice,
    data: Value,
) -> ChatResult<()> {
    let target = data.get_str_field(notice.target_field())?;
    let mut body = into_object(data.get_obj_field(notice.data_field())?.clone())?;

    let identity = connection.identity();
    let (name_field, role_field) = notice.sender_fields();
    body.insert(name_field.into(), identity.display_name.clone().into());
    body.insert(role_field.into(), identity.role.as_str().into());

    let reached = gateway.emit_to_user(&target, notice.event(), Value::Object(body));
    tracing::debug!(
        connection_id = %connection.id(),
        user_id = %identity.user_id,
        room = %RoomKey::User(target),
        event = notice.event(),
        reached,
        "notice delivered"
    );

    Ok(())
}

pub fn pong(gateway: &Gateway, connection: &Connection) {
    gateway.rooms().send_to(
        connection.id(),
        OutboundEvent::Pong(PongPayload { timestamp: now_ms() }),
    );
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_into_object() {
        assert!(into_object(Value::Null).unwrap().is_empty());
        assert_eq!(into_object(json!({ "a": 1 })).unwrap().len(), 1);
        assert!(matches!(
            into_object(json!([1, 2])),
            Err(ChatError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_every_role_signal_targets_a_distinct_role() {
        let roles: Vec<Role> = [
            RoleSignal::CarInquiry,
            RoleSignal::LotUpdate,
            RoleSignal::InspectionUpdate,
            RoleSignal::TransportUpdate,
        ]
        .into_iter()
        .map(RoleSignal::role)
        .collect();
        assert_eq!(roles, vec![Role::Seller, Role::Dealer, Role::Mechanic, Role::Towing]);
    }
}
