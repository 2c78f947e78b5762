// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

// Copyright 2026 Oxide Computer Company

//! Encap/decap fusion.

use crate::engine::steering::ReformatKind;

/// The header length separating L2 tunnels from L3 tunnels: an
/// Ethernet header plus an option-less IPv4 header.
pub const ENCAP_DECISION_SIZE: usize = 34;

/// Pick the single reformat that performs a template's raw decap and
/// raw encap, given the decap size and encap length present.
pub fn classify(
    decap: Option<usize>,
    encap: Option<usize>,
) -> Result<ReformatKind, &'static str> {
    match (decap, encap) {
        (None, None) => Err("no reformat"),
        (Some(_), None) => Ok(ReformatKind::TnlL2ToL2),
        (None, Some(_)) => Ok(ReformatKind::L2ToTnlL2),
        (Some(d), Some(e)) => {
            if e <= ENCAP_DECISION_SIZE && d > ENCAP_DECISION_SIZE {
                Ok(ReformatKind::TnlL3ToL2)
            } else if e > ENCAP_DECISION_SIZE && d <= ENCAP_DECISION_SIZE {
                Ok(ReformatKind::L2ToTnlL3)
            } else {
                Err("decap and encap are not an L3 tunnel pair")
            }
        }
    }
}
