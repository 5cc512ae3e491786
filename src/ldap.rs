//! LDAP authentication.
//!
//! [`Authenticator::authenticate`] verifies a username and password against
//! the directory and describes the identity: attributes, group membership and
//! administrative status. Each call owns exactly one connection, released on
//! every exit path.

pub mod connection;
pub mod error;
pub mod group;
pub mod observer;
mod resolve;
pub mod sanitize;
pub mod settings;
#[cfg(test)]
pub(crate) mod testing;

use std::sync::Arc;

use ldap3::SearchEntry;

pub use connection::{Connector, Directory, LdapConnector};
pub use error::AuthError;
pub use observer::{Event, Observer, TracingObserver};
pub use settings::{GroupSettings, SecurityProtocol, Settings};

use group::Membership;

/// Service account used to search for users.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    /// May contain the `%s` placeholder.
    pub dn: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("dn", &self.dn)
            .field("password", &"[redacted]")
            .finish()
    }
}

/// How the DN of a user is determined.
#[derive(Debug, Clone, PartialEq)]
pub enum Strategy {
    /// Template the DN from the username. No search.
    DirectBind { dn_template: String },
    /// Search the user base, anonymously or as a service account.
    SearchBind { credentials: Option<Credentials> },
}

impl Strategy {
    pub fn is_direct(&self) -> bool {
        matches!(self, Strategy::DirectBind { .. })
    }
}

/// Authenticated identity, as described by the directory.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UserEntry {
    pub uid: String,
    pub dn: String,
    pub common_name: String,
    pub username: String,
    pub first_name: String,
    pub surname: String,
    pub mail: String,
    pub is_admin: bool,
}

fn first_value(entry: &SearchEntry, attribute: &str) -> String {
    entry
        .attrs
        .get(attribute)
        .and_then(|values| values.first())
        .cloned()
        .unwrap_or_default()
}

impl UserEntry {
    fn from_entry(entry: &SearchEntry, settings: &Settings) -> Self {
        Self {
            uid: if settings.members_by_dn() {
                entry.dn.clone()
            } else {
                first_value(entry, &settings.user_uid)
            },
            dn: entry.dn.clone(),
            common_name: first_value(entry, &settings.attribute_cn),
            username: first_value(entry, &settings.attribute_username),
            first_name: first_value(entry, &settings.attribute_name),
            surname: first_value(entry, &settings.attribute_surname),
            mail: first_value(entry, &settings.attribute_mail),
            is_admin: false,
        }
    }
}

/// Verifies credentials against the directory.
///
/// Holds nothing mutable: one instance serves concurrent calls.
#[derive(Debug)]
pub struct Authenticator<C = LdapConnector, O = TracingObserver> {
    settings: Arc<Settings>,
    connector: C,
    observer: O,
}

impl Authenticator {
    /// Create a new [`Authenticator`] talking to a real LDAP server.
    pub fn new(settings: Arc<Settings>) -> Self {
        Self::with_parts(settings, LdapConnector, TracingObserver)
    }
}

impl<C: Connector, O: Observer> Authenticator<C, O> {
    pub fn with_parts(settings: Arc<Settings>, connector: C, observer: O) -> Self {
        Self {
            settings,
            connector,
            observer,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Verify `username` and `password`, then describe the identity.
    ///
    /// A [`UserEntry`] is only returned once the password bind succeeded and
    /// every enabled gate passed. The whole call is bounded by
    /// [`Settings::timeout`]; on expiry the connection is dropped.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
        strategy: &Strategy,
    ) -> Result<UserEntry, AuthError> {
        let result = tokio::time::timeout(
            self.settings.timeout(),
            self.run(username, password, strategy),
        )
        .await
        .unwrap_or(Err(AuthError::TimedOut));

        match &result {
            Ok(entry) => self.observer.observe(&Event::Succeeded { dn: &entry.dn }),
            Err(error) => self.observer.observe(&Event::Failed { username, error }),
        }

        result
    }

    async fn run(
        &self,
        username: &str,
        password: &str,
        strategy: &Strategy,
    ) -> Result<UserEntry, AuthError> {
        // See RFC 4513 section 5.1.2.
        if password.is_empty() {
            return Err(AuthError::EmptyPassword);
        }

        // Fail closed before any connection is opened.
        if strategy.is_direct() {
            sanitize::check_dn_value(username)?;
        } else {
            sanitize::check_filter_value(username)?;
        }

        let mut session = self
            .connector
            .connect(&self.settings)
            .await
            .map_err(AuthError::ConnectFailed)?;
        self.observer.observe(&Event::Connected { username });

        let result = self.verify(&mut session, username, password, strategy).await;
        session.close().await;

        result
    }

    async fn verify(
        &self,
        session: &mut C::Session,
        username: &str,
        password: &str,
        strategy: &Strategy,
    ) -> Result<UserEntry, AuthError> {
        let settings = &*self.settings;

        let user_dn = resolve::user_dn(session, settings, strategy, username).await?;
        self.observer.observe(&Event::Resolved { dn: &user_dn });

        // Some servers only expose attributes to the user itself, others only
        // to the service account.
        let bind_first = strategy.is_direct() || !settings.attributes_in_bind;

        if bind_first {
            resolve::bind_user(session, &user_dn, password).await?;
            self.observer.observe(&Event::PasswordVerified { dn: &user_dn });
        }

        let mut entry = self.fetch_attributes(session, &user_dn, username).await?;
        self.observer.observe(&Event::AttributesFetched { dn: &entry.dn });

        if let Some(group) = settings.group() {
            let membership = if settings.members_by_dn() {
                Membership::Dn(&entry.dn)
            } else {
                Membership::Uid(&entry.username)
            };
            group::check(session, group, membership).await?;
            self.observer.observe(&Event::MembershipVerified { dn: &entry.dn });
        }

        if let Some(admin_filter) = settings.admin_filter() {
            entry.is_admin = match self.check_admin(session, admin_filter, &user_dn, username).await {
                Ok(is_admin) => {
                    self.observer.observe(&Event::AdminChecked { dn: &user_dn, is_admin });
                    is_admin
                },
                Err(error) => {
                    self.observer.observe(&Event::AdminCheckFailed { dn: &user_dn, error: &error });
                    false
                },
            };
        }

        if !bind_first {
            resolve::bind_user(session, &user_dn, password).await?;
            self.observer.observe(&Event::PasswordVerified { dn: &user_dn });
        }

        Ok(entry)
    }

    /// Read the attributes of the resolved entry.
    async fn fetch_attributes(
        &self,
        session: &mut C::Session,
        user_dn: &str,
        username: &str,
    ) -> Result<UserEntry, AuthError> {
        let settings = &*self.settings;
        let filter = sanitize::filter(&settings.filter, username)?;
        let attributes = [
            settings.attribute_cn.as_str(),
            settings.attribute_username.as_str(),
            settings.attribute_name.as_str(),
            settings.attribute_surname.as_str(),
            settings.attribute_mail.as_str(),
            settings.user_uid.as_str(),
        ]
        .into_iter()
        .filter(|attribute| !attribute.is_empty() && *attribute != settings::DN_SENTINEL)
        .collect::<Vec<_>>();

        tracing::trace!(?attributes, filter, base = user_dn, "fetching attributes");

        let entries = session
            .search(user_dn, &filter, &attributes)
            .await
            .map_err(|source| AuthError::AttributeFetchFailed {
                dn: user_dn.to_owned(),
                source: Some(source),
            })?;

        entries
            .first()
            .map(|entry| UserEntry::from_entry(entry, settings))
            .ok_or_else(|| AuthError::AttributeFetchFailed {
                dn: user_dn.to_owned(),
                source: None,
            })
    }

    /// Whether the admin filter matches under the user's own entry.
    async fn check_admin(
        &self,
        session: &mut C::Session,
        admin_filter: &str,
        user_dn: &str,
        username: &str,
    ) -> Result<bool, AuthError> {
        let filter = sanitize::filter(admin_filter, username)?;
        tracing::trace!(filter, base = user_dn, "checking admin");

        let entries = session
            .search(user_dn, &filter, &[connection::NO_ATTRIBUTES])
            .await
            .map_err(|err| AuthError::AdminCheckFailed(Some(err)))?;

        if entries.is_empty() {
            return Err(AuthError::AdminCheckFailed(None));
        }

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::observer::tests::RecordingObserver;
    use super::testing::{MockConnector, entry};
    use super::*;

    const PEOPLE: &str = "ou=people,dc=example,dc=com";
    const GROUPS: &str = "ou=groups,dc=example,dc=com";
    const ALICE_DN: &str = "uid=alice,ou=people,dc=example,dc=com";
    const ALICE_FILTER: &str = "(&(objectClass=inetOrgPerson)(uid=alice))";
    const ADMIN_FILTER: &str = "(memberOf=cn=admins,ou=groups,dc=example,dc=com)";
    const PASSWORD: &str = "correct horse";

    fn settings() -> Settings {
        Settings {
            host: Some("ldap.example.com".into()),
            user_base: PEOPLE.into(),
            user_dn: "uid=%s,ou=people,dc=example,dc=com".into(),
            attribute_cn: "cn".into(),
            attribute_username: "uid".into(),
            attribute_name: "givenName".into(),
            attribute_surname: "sn".into(),
            attribute_mail: "mail".into(),
            user_uid: "uidNumber".into(),
            filter: "(&(objectClass=inetOrgPerson)(uid=%s))".into(),
            ..Default::default()
        }
    }

    fn with_groups(mut settings: Settings) -> Settings {
        settings.group = Some(GroupSettings {
            enabled: true,
            dn: GROUPS.into(),
            filter: "(cn=vpn)".into(),
            member_uid: "member".into(),
        });
        settings
    }

    fn alice() -> SearchEntry {
        entry(
            ALICE_DN,
            &[
                ("cn", &["Alice Liddell"]),
                ("uid", &["alice"]),
                ("givenName", &["Alice"]),
                ("sn", &["Liddell"]),
                ("mail", &["alice@example.com"]),
                ("uidNumber", &["1001"]),
            ],
        )
    }

    /// Directory holding alice, found by the user filter.
    fn directory() -> MockConnector {
        MockConnector::default()
            .with_account(ALICE_DN, PASSWORD)
            .with_result(PEOPLE, ALICE_FILTER, vec![entry(ALICE_DN, &[])])
            .with_result(ALICE_DN, ALICE_FILTER, vec![alice()])
    }

    fn authenticator(
        settings: Settings,
        connector: &MockConnector,
    ) -> (Authenticator<MockConnector, RecordingObserver>, RecordingObserver) {
        let observer = RecordingObserver::default();
        (
            Authenticator::with_parts(Arc::new(settings), connector.clone(), observer.clone()),
            observer,
        )
    }

    #[tokio::test]
    async fn test_direct_bind() {
        let connector = directory();
        let (auth, observer) = authenticator(settings(), &connector);

        let user = auth
            .authenticate("alice", PASSWORD, &auth.settings().direct_bind())
            .await
            .unwrap();

        assert_eq!(
            user,
            UserEntry {
                uid: "1001".into(),
                dn: ALICE_DN.into(),
                common_name: "Alice Liddell".into(),
                username: "alice".into(),
                first_name: "Alice".into(),
                surname: "Liddell".into(),
                mail: "alice@example.com".into(),
                is_admin: false,
            }
        );
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.closes(), 1);
        assert_eq!(
            connector.log(),
            vec![
                format!("bind {ALICE_DN}"),
                format!("search {ALICE_DN} {ALICE_FILTER} [cn,uid,givenName,sn,mail,uidNumber]"),
                "close".to_owned(),
            ]
        );
        assert_eq!(
            observer.events(),
            ["connected", "resolved", "password_verified", "attributes_fetched", "succeeded"]
        );
    }

    #[tokio::test]
    async fn test_direct_bind_wrong_password() {
        let connector = directory();
        let (auth, _) = authenticator(settings(), &connector);

        let err = auth
            .authenticate("alice", "wrong", &auth.settings().direct_bind())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::BindFailed { .. }));
        // no attribute fetch after a failed bind.
        assert_eq!(connector.log(), vec![format!("bind {ALICE_DN}"), "close".to_owned()]);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_direct_bind_with_empty_template() {
        let connector = directory();
        let mut settings = settings();
        settings.user_dn = String::new();
        let (auth, _) = authenticator(settings, &connector);

        let err = auth
            .authenticate("alice", PASSWORD, &auth.settings().direct_bind())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ResolveNotFound));
        // never binds as the empty DN.
        assert_eq!(connector.log(), vec!["close".to_owned()]);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_empty_password_opens_no_connection() {
        let connector = directory();
        let (auth, observer) = authenticator(settings(), &connector);

        for strategy in [auth.settings().direct_bind(), auth.settings().search_bind()] {
            let err = auth.authenticate("alice", "", &strategy).await.unwrap_err();
            assert!(matches!(err, AuthError::EmptyPassword));
        }
        assert_eq!(connector.connects(), 0);
        assert_eq!(observer.events(), ["failed", "failed"]);
    }

    #[tokio::test]
    async fn test_injection_opens_no_connection() {
        let connector = directory();
        let (auth, _) = authenticator(settings(), &connector);

        let err = auth
            .authenticate("ad(min", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SanitizeRejected { grammar: error::Grammar::Filter }));

        let err = auth
            .authenticate("alice,ou=admins", PASSWORD, &auth.settings().direct_bind())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::SanitizeRejected { grammar: error::Grammar::Dn }));

        assert_eq!(connector.connects(), 0);
    }

    #[tokio::test]
    async fn test_unreachable_directory() {
        let connector = directory().unreachable();
        let (auth, _) = authenticator(settings(), &connector);

        let err = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::ConnectFailed(_)));
        assert_eq!(connector.connects(), 1);
    }

    #[tokio::test]
    async fn test_search_bind_with_group() {
        let connector = directory().with_result(
            GROUPS,
            "(cn=vpn)",
            vec![entry(
                "cn=vpn,ou=groups,dc=example,dc=com",
                &[("member", &["uid=bob,ou=people,dc=example,dc=com", ALICE_DN])],
            )],
        );
        let (auth, observer) = authenticator(with_groups(settings()), &connector);

        let user = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap();

        assert_eq!(user.username, "alice");
        assert!(!user.is_admin);
        assert_eq!(connector.closes(), 1);
        assert_eq!(
            observer.events(),
            [
                "connected",
                "resolved",
                "password_verified",
                "attributes_fetched",
                "membership_verified",
                "succeeded"
            ]
        );
    }

    #[tokio::test]
    async fn test_search_bind_not_a_member() {
        let connector = directory().with_result(
            GROUPS,
            "(cn=vpn)",
            vec![entry(
                "cn=vpn,ou=groups,dc=example,dc=com",
                &[("member", &["uid=bob,ou=people,dc=example,dc=com", "cn=carol,ou=people"])],
            )],
        );
        let (auth, _) = authenticator(with_groups(settings()), &connector);

        let err = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap_err();

        // the password was right, membership still wins.
        assert!(matches!(err, AuthError::NotAMember { .. }));
        assert!(connector.log().contains(&format!("bind {ALICE_DN}")));
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_group_dn_mode() {
        let mut settings = with_groups(settings());
        settings.user_uid = settings::DN_SENTINEL.into();
        let connector = directory().with_result(
            GROUPS,
            "(cn=vpn)",
            vec![entry("cn=vpn,ou=groups,dc=example,dc=com", &[("member", &[ALICE_DN])])],
        );
        let (auth, _) = authenticator(settings, &connector);

        let user = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap();

        assert_eq!(user.uid, ALICE_DN);
        assert!(
            connector
                .log()
                .contains(&format!("search {ALICE_DN} {ALICE_FILTER} [cn,uid,givenName,sn,mail]"))
        );
    }

    #[tokio::test]
    async fn test_ambiguous_and_missing_users() {
        let connector = MockConnector::default().with_result(
            PEOPLE,
            ALICE_FILTER,
            vec![entry(ALICE_DN, &[]), entry("uid=alice,ou=staff,dc=example,dc=com", &[])],
        );
        let (auth, _) = authenticator(settings(), &connector);
        let err = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ResolveAmbiguous { count: 2 }));

        let connector = MockConnector::default();
        let (auth, _) = authenticator(settings(), &connector);
        let err = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::ResolveNotFound));
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_attributes_missing() {
        let connector = MockConnector::default()
            .with_account(ALICE_DN, PASSWORD)
            .with_result(PEOPLE, ALICE_FILTER, vec![entry(ALICE_DN, &[])]);
        let (auth, _) = authenticator(settings(), &connector);

        let err = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::AttributeFetchFailed { source: None, .. }));
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_attributes_in_bind_binds_last() {
        let mut settings = settings();
        settings.attributes_in_bind = true;
        settings.bind_dn = Some("cn=reader,dc=example,dc=com".into());
        settings.bind_password = Some("reader".into());
        let connector = directory().with_account("cn=reader,dc=example,dc=com", "reader");
        let (auth, observer) = authenticator(settings, &connector);

        auth.authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap();

        let log = connector.log();
        assert_eq!(log[0], "bind cn=reader,dc=example,dc=com");
        assert_eq!(log[log.len() - 2], format!("bind {ALICE_DN}"));
        assert_eq!(
            observer.events(),
            ["connected", "resolved", "attributes_fetched", "password_verified", "succeeded"]
        );
    }

    #[tokio::test]
    async fn test_attributes_in_bind_wrong_password() {
        let mut settings = settings();
        settings.attributes_in_bind = true;
        let connector = directory();
        let (auth, _) = authenticator(settings, &connector);

        let err = auth
            .authenticate("alice", "wrong", &auth.settings().search_bind())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::BindFailed { .. }));
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_attributes_in_bind_ignored_for_direct_bind() {
        let mut settings = settings();
        settings.attributes_in_bind = true;
        let connector = directory();
        let (auth, _) = authenticator(settings, &connector);

        auth.authenticate("alice", PASSWORD, &auth.settings().direct_bind())
            .await
            .unwrap();

        assert_eq!(connector.log()[0], format!("bind {ALICE_DN}"));
    }

    #[tokio::test]
    async fn test_admin() {
        let mut settings = settings();
        settings.admin_filter = Some(ADMIN_FILTER.into());
        let connector = directory().with_result(ALICE_DN, ADMIN_FILTER, vec![entry(ALICE_DN, &[])]);
        let (auth, _) = authenticator(settings, &connector);

        let user = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap();

        assert!(user.is_admin);
    }

    #[tokio::test]
    async fn test_admin_template() {
        let mut settings = settings();
        settings.admin_filter = Some("(&(uid=%s)(employeeType=admin))".into());
        let connector = directory().with_result(
            ALICE_DN,
            "(&(uid=alice)(employeeType=admin))",
            vec![entry(ALICE_DN, &[])],
        );
        let (auth, _) = authenticator(settings, &connector);

        let user = auth
            .authenticate("alice", PASSWORD, &auth.settings().direct_bind())
            .await
            .unwrap();

        assert!(user.is_admin);
    }

    #[tokio::test]
    async fn test_admin_failure_is_recoverable() {
        let mut settings = settings();
        settings.admin_filter = Some(ADMIN_FILTER.into());

        // no match.
        let connector = directory();
        let (auth, observer) = authenticator(settings.clone(), &connector);
        let user = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap();
        assert!(!user.is_admin);
        assert!(observer.events().contains(&"admin_check_failed"));

        // search error.
        let connector = directory().with_failing_search(ALICE_DN, ADMIN_FILTER);
        let (auth, _) = authenticator(settings, &connector);
        let user = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap();
        assert!(!user.is_admin);
    }

    #[tokio::test]
    async fn test_admin_does_not_rescue_failures() {
        let mut settings = settings();
        settings.admin_filter = Some(ADMIN_FILTER.into());
        let connector = directory().with_result(ALICE_DN, ADMIN_FILTER, vec![entry(ALICE_DN, &[])]);
        let (auth, _) = authenticator(settings, &connector);

        let err = auth
            .authenticate("alice", "wrong", &auth.settings().search_bind())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::BindFailed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_releases_connection() {
        let connector = directory().stalled();
        let (auth, _) = authenticator(settings(), &connector);

        let err = auth
            .authenticate("alice", PASSWORD, &auth.settings().search_bind())
            .await
            .unwrap_err();

        assert!(matches!(err, AuthError::TimedOut));
        assert_eq!(connector.connects(), 1);
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_calls_use_own_connections() {
        let connector = directory();
        let (auth, _) = authenticator(settings(), &connector);
        let auth = Arc::new(auth);

        let calls = (0..8).map(|i| {
            let auth = Arc::clone(&auth);
            tokio::spawn(async move {
                let password = if i % 2 == 0 { PASSWORD } else { "wrong" };
                auth.authenticate("alice", password, &auth.settings().search_bind())
                    .await
                    .is_ok()
            })
        });

        let mut successes = 0;
        for call in calls.collect::<Vec<_>>() {
            if tokio::time::timeout(Duration::from_secs(5), call).await.unwrap().unwrap() {
                successes += 1;
            }
        }

        assert_eq!(successes, 4);
        assert_eq!(connector.connects(), 8);
        assert_eq!(connector.closes(), 8);
    }
}
