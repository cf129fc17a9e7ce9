use super::*;

fn route(source_ref: u64, target_ref: u64, address: RouteAddress) -> Route {
    Route {
        source_name: "tcp".to_string(),
        source_ref,
        target_name: "target".to_string(),
        target_ref,
        address,
    }
}

#[test]
fn resolve_honors_insertion_order() {
    let mut table = RouteTable::new();
    table.add(route(8080, 1, RouteAddress::Any));
    table.add(route(8080, 2, RouteAddress::Any));

    let hit = table
        .resolve("tcp", 8080, "127.0.0.1".parse().unwrap())
        .unwrap();
    assert_eq!(hit.target_ref, 1);
}

#[test]
fn specific_address_wins_only_when_it_matches() {
    let mut table = RouteTable::new();
    table.add(route(8080, 1, RouteAddress::Ip("10.0.0.1".parse().unwrap())));
    table.add(route(8080, 2, RouteAddress::Any));

    let specific = table.resolve("tcp", 8080, "10.0.0.1".parse().unwrap());
    assert_eq!(specific.unwrap().target_ref, 1);
    let wildcard = table.resolve("tcp", 8080, "10.0.0.2".parse().unwrap());
    assert_eq!(wildcard.unwrap().target_ref, 2);
}

#[test]
fn source_name_must_match() {
    let mut table = RouteTable::new();
    table.add(route(8080, 1, RouteAddress::Any));
    assert!(table
        .resolve("other", 8080, "127.0.0.1".parse().unwrap())
        .is_none());
}

#[test]
fn remove_takes_the_first_match_only() {
    let mut table = RouteTable::new();
    table.add(route(8080, 1, RouteAddress::Any));
    table.add(route(8080, 1, RouteAddress::Any));
    assert_eq!(table.len(), 2);

    assert!(table.remove(8080, |r| r.target_ref == 1));
    assert_eq!(table.len(), 1);
    assert!(table.remove(8080, |r| r.target_ref == 1));
    assert!(!table.remove(8080, |r| r.target_ref == 1));
    assert!(table.is_empty());
}

#[test]
fn remove_of_unknown_ref_is_false() {
    let mut table = RouteTable::new();
    assert!(!table.remove(9999, |_| true));
}
