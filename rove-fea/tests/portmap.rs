//
// Copyright (c) The Rove Project Developers
//
// SPDX-License-Identifier: MIT
//

use std::sync::{Arc, Mutex};

use rove_fea::portmap::{NexthopPortMapper, PortMapperObserver};

#[derive(Debug)]
struct RecordingObserver(Arc<Mutex<Vec<bool>>>);

impl PortMapperObserver for RecordingObserver {
    fn on_mapping_changed(&mut self, changed: bool) {
        self.0.lock().unwrap().push(changed);
    }
}

#[test]
fn lookup_order() {
    let mut mapper = NexthopPortMapper::new();
    mapper.add_interface("eth0", "eth0", 1);
    mapper.add_ipv4("192.0.2.1".parse().unwrap(), 2);
    mapper.add_subnet("192.0.2.0/24".parse().unwrap(), 3);

    // The host address mapping shadows the covering subnet.
    assert_eq!(mapper.lookup_nexthop_interface("eth0", "eth0"), Some(1));
    assert_eq!(
        mapper.lookup_nexthop_ipv4(&"192.0.2.1".parse().unwrap()),
        Some(2)
    );
    assert_eq!(
        mapper.lookup_nexthop_ipv4(&"192.0.2.7".parse().unwrap()),
        Some(3)
    );
    assert_eq!(
        mapper.lookup_nexthop_ipv4(&"198.51.100.1".parse().unwrap()),
        None
    );
}

#[test]
fn batched_change_notifications() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut mapper = NexthopPortMapper::new();
    mapper.add_observer(Box::new(RecordingObserver(log.clone())));

    mapper.add_interface("eth0", "eth0", 1);
    mapper.add_ipv6("2001:db8::1".parse().unwrap(), 2);
    mapper.commit_updates();

    // Second commit with no intervening mutation reports no change.
    mapper.commit_updates();

    // Removing something that isn't mapped is not a change.
    mapper.remove_ipv4(&"192.0.2.1".parse().unwrap());
    mapper.commit_updates();

    assert_eq!(*log.lock().unwrap(), vec![true, false, false]);
}
