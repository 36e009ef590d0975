// Copyright 2025 New Vector Ltd.
//
// SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-Element-Commercial
// Please see LICENSE files in the repository root for full details.

use std::{collections::BTreeMap, fmt::Debug};

use serde::{Serialize, de::DeserializeOwned};

#[track_caller]
pub(crate) fn assert_json_roundtrip<T: Serialize + DeserializeOwned + PartialEq + Debug>(
    got: &T,
    expected_value: serde_json::Value,
) {
    let got_value = serde_json::to_value(got).expect("could not serialize object as JSON value");
    assert_eq!(got_value, expected_value);

    let expected: T = serde_json::from_value(expected_value)
        .expect("could not deserialize object from JSON value");
    assert_eq!(got, &expected);
}

/// Serialize a request as a form body, and return the decoded pairs so that
/// tests don't depend on the field order.
#[track_caller]
pub(crate) fn form_pairs<T: Serialize>(request: &T) -> BTreeMap<String, String> {
    let encoded = serde_urlencoded::to_string(request).expect("could not encode form");
    serde_urlencoded::from_str(&encoded).expect("could not decode form")
}
