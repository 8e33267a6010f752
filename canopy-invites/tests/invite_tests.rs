use std::sync::Arc;

use canopy_ca::CertificateAuthority;
use canopy_invites::{InviteError, InviteService, InviteStatus};
use canopy_registry::{HostRegistry, OrganizationRegistry, RegistryError, Subnet, DEFAULT_ULA_PREFIX};
use canopy_types::{HostName, OrgName, Tag};
use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;

fn setup() -> (Arc<HostRegistry>, InviteService) {
    let ca = Arc::new(CertificateAuthority::in_memory());
    ca.create("acme").unwrap();
    let base: Subnet = DEFAULT_ULA_PREFIX.parse().unwrap();
    let orgs = Arc::new(OrganizationRegistry::in_memory(base).unwrap());
    orgs.create(org("eng")).unwrap();
    let hosts = Arc::new(HostRegistry::in_memory(orgs, ca));
    let invites = InviteService::in_memory(Arc::clone(&hosts));
    (hosts, invites)
}

fn org(name: &str) -> OrgName {
    OrgName::parse(name).unwrap()
}

fn host(name: &str) -> HostName {
    HostName::parse(name).unwrap()
}

fn tags(names: &[&str]) -> Vec<Tag> {
    names.iter().map(|t| Tag::parse(t).unwrap()).collect()
}

#[test]
fn generate_rejects_non_positive_parameters() {
    let (_, invites) = setup();
    assert!(matches!(
        invites.generate(&org("eng"), 0, 1),
        Err(InviteError::InvalidInput(_))
    ));
    assert!(matches!(
        invites.generate(&org("eng"), 7, 0),
        Err(InviteError::InvalidInput(_))
    ));
}

#[test]
fn generate_requires_known_org() {
    let (_, invites) = setup();
    assert!(matches!(
        invites.generate(&org("ghost"), 7, 1),
        Err(InviteError::Registry(RegistryError::OrgNotFound(_)))
    ));
}

#[test]
fn generated_invite_starts_active() {
    let (_, invites) = setup();
    let token = invites.generate(&org("eng"), 7, 3).unwrap();
    assert_eq!(token.total_uses, 3);
    assert_eq!(token.remaining_uses, 3);
    assert!(token.active);
    assert_eq!(token.status_at(Utc::now()), InviteStatus::Active);
    assert_eq!(token.org, org("eng"));
}

#[test]
fn list_preserves_creation_order_and_filters() {
    let (_, invites) = setup();
    let a = invites.generate(&org("eng"), 7, 1).unwrap();
    let b = invites.generate(&org("eng"), 7, 1).unwrap();
    invites.revoke(&b.code).unwrap();

    let all = invites.list();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].code, a.code);
    assert_eq!(all[1].code, b.code);

    let active = invites.list_filtered(None, Some(true));
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].code, a.code);

    let for_eng = invites.list_filtered(Some(&org("eng")), None);
    assert_eq!(for_eng.len(), 2);
}

#[test]
fn invite_permits_exactly_n_redemptions() {
    let (_, invites) = setup();
    let token = invites.generate(&org("eng"), 7, 3).unwrap();

    for i in 0..3 {
        invites
            .redeem(&token.code, host(&format!("phone{i}")), vec![], None)
            .unwrap();
    }
    assert!(matches!(
        invites.redeem(&token.code, host("phone9"), vec![], None),
        Err(InviteError::Exhausted)
    ));

    let after = invites.get(&token.code).unwrap();
    assert_eq!(after.remaining_uses, 0);
    assert!(!after.active);
    assert_eq!(after.status_at(Utc::now()), InviteStatus::Exhausted);
}

#[test]
fn expired_invite_fails_even_with_uses_left() {
    let (_, invites) = setup();
    let token = invites
        .generate_until(&org("eng"), Utc::now() - Duration::seconds(1), 5)
        .unwrap();
    assert!(matches!(
        invites.redeem(&token.code, host("phone1"), vec![], None),
        Err(InviteError::Expired)
    ));
    assert_eq!(invites.get(&token.code).unwrap().remaining_uses, 5);
}

#[test]
fn revoked_invite_is_inactive_and_revocation_is_idempotent() {
    let (_, invites) = setup();
    let token = invites.generate(&org("eng"), 7, 2).unwrap();
    invites.revoke(&token.code).unwrap();
    invites.revoke(&token.code).unwrap();

    assert!(matches!(
        invites.redeem(&token.code, host("phone1"), vec![], None),
        Err(InviteError::Revoked)
    ));
    assert!(matches!(
        invites.revoke(&canopy_invites::InviteCode::from_input("nosuchcode")),
        Err(InviteError::InvalidCode)
    ));
}

#[test]
fn unknown_code_is_invalid() {
    let (_, invites) = setup();
    assert!(matches!(
        invites.redeem(
            &canopy_invites::InviteCode::from_input("nope"),
            host("phone1"),
            vec![],
            None
        ),
        Err(InviteError::InvalidCode)
    ));
}

#[test]
fn redemption_creates_host_in_the_invite_org() {
    let (hosts, invites) = setup();
    let token = invites.generate(&org("eng"), 7, 1).unwrap();
    let h = invites
        .redeem(&token.code, host("phone1"), tags(&["vpn"]), None)
        .unwrap();

    assert_eq!(h.org, org("eng"));
    assert_eq!(h.certificate.details().groups, vec!["org_eng", "vpn"]);
    assert_eq!(
        hosts.get(&org("eng"), &host("phone1")).unwrap().address,
        h.address
    );
}

#[test]
fn single_use_invite_scenario() {
    let (_, invites) = setup();
    let token = invites.generate(&org("eng"), 7, 1).unwrap();
    invites
        .redeem(&token.code, host("phone1"), vec![], None)
        .unwrap();
    assert!(matches!(
        invites.redeem(&token.code, host("phone2"), vec![], None),
        Err(InviteError::Exhausted)
    ));
}

#[test]
fn failed_host_creation_rolls_the_use_back() {
    let (hosts, invites) = setup();
    hosts.create(&org("eng"), host("phone1"), vec![]).unwrap();

    let token = invites.generate(&org("eng"), 7, 1).unwrap();
    // Name conflict: the redemption fails but the use must survive.
    assert!(matches!(
        invites.redeem(&token.code, host("phone1"), vec![], None),
        Err(InviteError::Registry(RegistryError::HostExists { .. }))
    ));
    let after = invites.get(&token.code).unwrap();
    assert_eq!(after.remaining_uses, 1);
    assert!(after.active);

    // The same invite then succeeds with a fresh name.
    invites
        .redeem(&token.code, host("phone2"), vec![], None)
        .unwrap();
}

#[test]
fn enrollee_supplied_key_is_used_verbatim() {
    let (_, invites) = setup();
    let token = invites.generate(&org("eng"), 7, 1).unwrap();
    let enrollee = canopy_ca::KeyPair::generate();
    let h = invites
        .redeem(
            &token.code,
            host("phone1"),
            vec![],
            Some(enrollee.verifying_key.clone()),
        )
        .unwrap();
    assert!(!h.has_server_key);
    assert_eq!(h.certificate.public_key().unwrap(), enrollee.verifying_key);
}

#[test]
fn concurrent_single_use_redemption_has_exactly_one_winner() {
    let (_, invites) = setup();
    let invites = Arc::new(invites);
    let token = invites.generate(&org("eng"), 7, 1).unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let invites = Arc::clone(&invites);
        let code = token.code.clone();
        handles.push(std::thread::spawn(move || {
            invites.redeem(&code, host(&format!("racer{i}")), vec![], None)
        }));
    }

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for r in results.iter().filter(|r| r.is_err()) {
        assert!(matches!(r, Err(InviteError::Exhausted)));
    }
}

#[test]
fn persisted_invites_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let ca = Arc::new(CertificateAuthority::open(dir.path()).unwrap());
    ca.create("acme").unwrap();
    let base: Subnet = DEFAULT_ULA_PREFIX.parse().unwrap();
    let orgs = Arc::new(OrganizationRegistry::open(base, dir.path()).unwrap());
    orgs.create(org("eng")).unwrap();
    let hosts = Arc::new(HostRegistry::open(Arc::clone(&orgs), Arc::clone(&ca), dir.path()).unwrap());

    let code = {
        let invites = InviteService::open(Arc::clone(&hosts), dir.path()).unwrap();
        let token = invites.generate(&org("eng"), 7, 2).unwrap();
        invites
            .redeem(&token.code, host("phone1"), vec![], None)
            .unwrap();
        token.code
    };

    let invites = InviteService::open(Arc::clone(&hosts), dir.path()).unwrap();
    let reloaded = invites.get(&code).unwrap();
    assert_eq!(reloaded.remaining_uses, 1);
    assert!(reloaded.active);

    // The reloaded token still redeems.
    invites.redeem(&code, host("phone2"), vec![], None).unwrap();
    assert!(matches!(
        invites.redeem(&code, host("phone3"), vec![], None),
        Err(InviteError::Exhausted)
    ));
}
