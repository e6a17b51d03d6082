//! Chat-room capability resolution from room type and participant role.
//!
//! A single pure function over two small enums replaces the ad hoc boolean
//! checks scattered through the chat callers; it holds no state and is
//! recomputed per action, so it always reflects the participant's latest
//! role.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `RoomType` values. `TwoWay` is a wire-compatible
/// alias carried by older rooms and resolves exactly like `OneToOne`.
pub enum RoomType {
    OneToN,
    OneToOne,
    TwoWay,
}

impl RoomType {
    /// Collapses the wire alias so permission rules see two shapes only.
    fn is_direct(self) -> bool {
        matches!(self, Self::OneToOne | Self::TwoWay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// A participant's standing within one room. ONE_TO_N rooms carry exactly
/// one `Owner`; direct rooms typically hold plain `Member`s but elevated
/// roles are not forbidden by the model.
pub enum OwnerRole {
    Owner,
    ViceOwner,
    Member,
}

impl OwnerRole {
    pub const ALL: [Self; 3] = [Self::Owner, Self::ViceOwner, Self::Member];

    fn is_owner(self) -> bool {
        self == Self::Owner
    }

    fn is_admin(self) -> bool {
        matches!(self, Self::Owner | Self::ViceOwner)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Public struct `RoomCapabilities` used across Axon components.
pub struct RoomCapabilities {
    pub can_send_message: bool,
    pub can_react: bool,
    pub can_edit_notice: bool,
    pub can_manage_members: bool,
    pub can_edit_room: bool,
    pub can_delete_room: bool,
}

/// Resolves the capability set for a participant of `role` in a room of
/// `room_type`.
///
/// Rules, in precedence order: sending is unconditional in direct rooms and
/// admin-only in ONE_TO_N; reacting is always allowed; notice and member
/// management require admin; editing or deleting the room requires the
/// owner — vice-owners never gain those two.
pub fn resolve(room_type: RoomType, role: OwnerRole) -> RoomCapabilities {
    let is_owner = role.is_owner();
    let is_admin = role.is_admin();

    RoomCapabilities {
        can_send_message: room_type.is_direct() || is_admin,
        can_react: true,
        can_edit_notice: is_admin,
        can_manage_members: is_admin,
        can_edit_room: is_owner,
        can_delete_room: is_owner,
    }
}

#[cfg(test)]
mod tests {
    use super::{resolve, OwnerRole, RoomCapabilities, RoomType};

    #[test]
    fn one_to_n_vice_owner_manages_but_cannot_edit_or_delete() {
        let capabilities = resolve(RoomType::OneToN, OwnerRole::ViceOwner);
        assert_eq!(
            capabilities,
            RoomCapabilities {
                can_send_message: true,
                can_react: true,
                can_edit_notice: true,
                can_manage_members: true,
                can_edit_room: false,
                can_delete_room: false,
            }
        );
    }

    #[test]
    fn one_to_one_member_sends_but_holds_no_admin_capabilities() {
        let capabilities = resolve(RoomType::OneToOne, OwnerRole::Member);
        assert!(capabilities.can_send_message);
        assert!(capabilities.can_react);
        assert!(!capabilities.can_edit_notice);
        assert!(!capabilities.can_manage_members);
        assert!(!capabilities.can_edit_room);
        assert!(!capabilities.can_delete_room);
    }

    #[test]
    fn one_to_n_member_is_read_only_except_reactions() {
        let capabilities = resolve(RoomType::OneToN, OwnerRole::Member);
        assert!(!capabilities.can_send_message);
        assert!(capabilities.can_react);
    }

    #[test]
    fn two_way_resolves_exactly_like_one_to_one() {
        for role in OwnerRole::ALL {
            assert_eq!(
                resolve(RoomType::TwoWay, role),
                resolve(RoomType::OneToOne, role),
            );
        }
    }

    #[test]
    fn invariants_hold_over_the_whole_input_space() {
        for room_type in [RoomType::OneToN, RoomType::OneToOne, RoomType::TwoWay] {
            for role in OwnerRole::ALL {
                let capabilities = resolve(room_type, role);

                // Reacting is unconditional for every participant.
                assert!(capabilities.can_react);
                // Room edit/delete always travel together and imply admin.
                assert_eq!(capabilities.can_edit_room, capabilities.can_delete_room);
                assert_eq!(capabilities.can_edit_room, role == OwnerRole::Owner);
                // Notice editing and member management are the admin pair.
                assert_eq!(capabilities.can_edit_notice, capabilities.can_manage_members);
                assert_eq!(
                    capabilities.can_edit_notice,
                    matches!(role, OwnerRole::Owner | OwnerRole::ViceOwner)
                );
                // An owner can always send; a member only in direct rooms.
                if role == OwnerRole::Owner {
                    assert!(capabilities.can_send_message);
                }
                if room_type != RoomType::OneToN {
                    assert!(capabilities.can_send_message);
                }
            }
        }
    }

    #[test]
    fn serializes_roles_and_room_types_snake_case() {
        assert_eq!(
            serde_json::to_string(&RoomType::OneToN).expect("serialize"),
            "\"one_to_n\""
        );
        assert_eq!(
            serde_json::to_string(&OwnerRole::ViceOwner).expect("serialize"),
            "\"vice_owner\""
        );
    }
}
