// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

#![no_main]

use libfuzzer_sys::fuzz_target;
use verdant::classifier::{parse_outcome, MatchedProfile};
use verdant::profiles::ReferenceProfile;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    let profiles = [ReferenceProfile {
        id: "p1".to_string(),
        common_name: "Japanese knotweed".to_string(),
        scientific_name: "Reynoutria japonica".to_string(),
        is_invasive: true,
        sample_images: Vec::new(),
        notes: String::new(),
        created_at: chrono::Utc::now(),
    }];

    if let Ok(outcome) = parse_outcome(text, &profiles) {
        assert!((0.0..=1.0).contains(&outcome.confidence));
        if let MatchedProfile::Profile(id) = &outcome.matched_profile_id {
            assert_eq!(id, "p1");
            assert_eq!(outcome.matched_name, "Japanese knotweed");
        }
    }
});
