/*
 * Copyright 2020 Nikhil Marathe <nsm.nikhil@gmail.com>
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use std::collections::BTreeSet;

use mixbuild::{BazelContext, DelegationPolicy, MockBazelContext, RequestRegistry};
use mixbuild_interface::{ConfigKey, OsType, RequestKey, RequestKind};
use proptest::prelude::*;

#[test]
fn test_concurrent_enqueue() {
    let registry = RequestRegistry::new();
    crossbeam::scope(|s| {
        for thread in 0..8 {
            let registry = &registry;
            s.spawn(move |_| {
                for i in 0..100 {
                    // Every thread enqueues the same 100 labels, in a different order.
                    let n = (i + thread * 13) % 100;
                    registry.enqueue(RequestKey::new(
                        &format!("//pkg:t{}", n),
                        RequestKind::OutputFiles,
                        ConfigKey::common(),
                    ));
                }
            });
        }
    })
    .unwrap();
    assert_eq!(registry.len(), 100);
}

#[test]
fn test_concurrent_queue_through_context() {
    let ctx = MockBazelContext::new("/ob");
    let arm = ConfigKey::new("arm64", OsType::android());
    crossbeam::scope(|s| {
        for kind in &RequestKind::ALL {
            let ctx = &ctx;
            let arm = arm.clone();
            s.spawn(move |_| {
                for i in 0..10 {
                    ctx.queue_request(&format!("//lib:l{}", i), *kind, arm.clone())
                        .unwrap();
                }
            });
        }
    })
    .unwrap();
    assert_eq!(ctx.queued().len(), 10 * RequestKind::ALL.len());
}

fn label() -> impl Strategy<Value = String> {
    "//[a-c]{1,2}:[a-c]{1,2}"
}

proptest! {
    #[test]
    fn take_is_sorted_and_deduplicated(labels in prop::collection::vec(label(), 0..30)) {
        let registry = RequestRegistry::new();
        for l in &labels {
            registry.enqueue(RequestKey::new(l, RequestKind::CcInfo, ConfigKey::common()));
        }
        let expected: BTreeSet<String> = labels.iter().map(|l| format!("@{}", l)).collect();
        let taken: Vec<String> = registry.take().iter().map(|k| k.label().to_owned()).collect();
        prop_assert_eq!(taken, expected.into_iter().collect::<Vec<_>>());
        prop_assert!(registry.is_empty());
    }

    #[test]
    fn disabled_always_wins(name in "[a-z]{1,8}", enabled in any::<bool>(), default in any::<bool>()) {
        let enabled_names = if enabled { vec![name.clone()] } else { vec![] };
        let policy = DelegationPolicy::new(enabled_names, vec![name.clone()], default);
        prop_assert!(!policy.is_delegated(&name));
    }

    #[test]
    fn default_applies_to_unlisted(name in "[a-z]{1,8}", default in any::<bool>()) {
        let policy = DelegationPolicy::new(vec![], vec![], default);
        prop_assert_eq!(policy.is_delegated(&name), default);
    }
}
