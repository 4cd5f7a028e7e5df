//! Which pairs of slots get a direct link.

use meshcall_common::SlotIndex;

/// Linkability of `local` and `remote`, each given with its sharer when it
/// is a screen share. Never self, never two screen shares, never a screen
/// share and its own sharer.
pub fn should_link(
    local: SlotIndex,
    local_sharer: Option<SlotIndex>,
    remote: SlotIndex,
    remote_sharer: Option<SlotIndex>,
) -> bool {
    if local == remote {
        return false;
    }
    if local_sharer.is_some() && remote_sharer.is_some() {
        return false;
    }
    local_sharer != Some(remote) && remote_sharer != Some(local)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participants_link_with_each_other() {
        assert!(should_link(0, None, 1, None));
        assert!(should_link(2, None, 0, None));
        assert!(!should_link(1, None, 1, None));
    }

    #[test]
    fn share_links_to_everyone_but_its_sharer() {
        // Slot 3 is slot 1's screen.
        assert!(should_link(3, Some(1), 0, None));
        assert!(should_link(3, Some(1), 2, None));
        assert!(!should_link(3, Some(1), 1, None));
        assert!(!should_link(1, None, 3, Some(1)));
        assert!(should_link(0, None, 3, Some(1)));
    }

    #[test]
    fn shares_never_link_to_each_other() {
        assert!(!should_link(3, Some(1), 4, Some(0)));
    }
}
