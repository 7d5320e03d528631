//! End-to-end tests for the auth core running on the in-memory adapter.
//!
//! Covers: seeding → login → token verification → refresh rotation → logout,
//! plus role administration, account lifecycle and storage failure handling.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;

    use hris_auth::{
        AccountAdmin, ActionType, AdminSeed, Argon2PasswordHasher, AuthConfig, AuthError, AuthResult,
        AuthStores, CredentialStore, DenialKind, NewAccount, NewPermission, NewRole,
        PasswordHasher, PermissionAdmin, PermissionName, RefreshSession, RefreshSessionStore,
        ResourceType, RoleCode, RoleGraph, Scope, Seeder, SessionFacade, SessionLookup,
        StoreError, StoreResult, User, UserStatus,
    };
    use hris_core::{ExpectedVersion, UserId};

    use crate::memory_store::InMemoryAuthStore;

    const ADMIN_EMAIL: &str = "admin@hris.com";
    const ADMIN_PASSWORD: &str = "Admin@123";
    const EMPLOYEE_PASSWORD: &str = "Employee@123";

    struct Harness {
        store: Arc<InMemoryAuthStore>,
        stores: AuthStores,
        hasher: Arc<dyn PasswordHasher>,
        facade: SessionFacade,
        accounts: AccountAdmin,
        catalog: PermissionAdmin,
        admin_id: UserId,
    }

    fn admin_seed() -> AdminSeed {
        AdminSeed {
            email: ADMIN_EMAIL.to_string(),
            display_name: "System Administrator".to_string(),
            password: ADMIN_PASSWORD.to_string(),
        }
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryAuthStore::new());
        let stores = AuthStores::from_shared(store.clone());
        let config = config();
        // Minimal Argon2 cost keeps the suite fast.
        let hasher: Arc<dyn PasswordHasher> =
            Arc::new(Argon2PasswordHasher::with_params(1024, 1, 1).unwrap());

        let report = Seeder::new(stores.clone(), hasher.clone())
            .with_storage_timeout(config.storage_timeout)
            .run(&admin_seed())
            .await
            .unwrap();

        Harness {
            facade: SessionFacade::new(&config, &stores, hasher.clone()),
            accounts: AccountAdmin::new(&config, &stores, hasher.clone()),
            catalog: PermissionAdmin::new(stores.permissions.clone())
                .with_storage_timeout(config.storage_timeout),
            admin_id: report.admin_created.unwrap(),
            store,
            stores,
            hasher,
        }
    }

    async fn register_employee(h: &Harness, email: &str) -> UserId {
        h.accounts
            .register(NewAccount {
                email: email.to_string(),
                display_name: "Jane Employee".to_string(),
                password: EMPLOYEE_PASSWORD.to_string(),
                role_codes: Vec::new(),
            })
            .await
            .unwrap()
            .id
    }

    fn code(raw: &str) -> RoleCode {
        RoleCode::parse(raw).unwrap()
    }

    fn config() -> AuthConfig {
        AuthConfig {
            storage_timeout: Duration::from_millis(200),
            ..AuthConfig::default()
        }
    }

    /// Counts verifications; hashing is not counted.
    struct CountingHasher {
        inner: Argon2PasswordHasher,
        verifies: AtomicUsize,
    }

    impl PasswordHasher for CountingHasher {
        fn hash(&self, plain: &str) -> AuthResult<String> {
            self.inner.hash(plain)
        }

        fn verify(&self, plain: &str, hash: &str) -> bool {
            self.verifies.fetch_add(1, Ordering::SeqCst);
            self.inner.verify(plain, hash)
        }
    }

    /// Credential store whose next `find_user` fails once when armed.
    struct FlakyCredentials {
        inner: Arc<InMemoryAuthStore>,
        fail_next_lookup: AtomicBool,
    }

    impl FlakyCredentials {
        fn trip(&self) -> StoreResult<()> {
            if self.fail_next_lookup.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Unavailable("connection reset".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl CredentialStore for FlakyCredentials {
        async fn find_user(&self, id: UserId) -> StoreResult<Option<User>> {
            self.trip()?;
            self.inner.find_user(id).await
        }

        async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
            self.inner.find_user_by_email(email).await
        }

        async fn insert_user(&self, user: &User) -> StoreResult<()> {
            self.inner.insert_user(user).await
        }

        async fn update_user(&self, user: &User, expected: ExpectedVersion) -> StoreResult<u64> {
            self.inner.update_user(user, expected).await
        }

        async fn delete_user(&self, id: UserId) -> StoreResult<bool> {
            self.inner.delete_user(id).await
        }

        async fn count_users(&self) -> StoreResult<u64> {
            self.inner.count_users().await
        }

        async fn users_with_role(&self, code: &RoleCode) -> StoreResult<Vec<User>> {
            self.inner.users_with_role(code).await
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Login / tokens
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn admin_login_issues_bearer_token_with_snapshot() {
        let h = harness().await;

        let result = h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
        assert_eq!(result.token_type, "Bearer");
        assert_eq!(result.principal.id, h.admin_id);
        assert!(result.roles.contains(&"ADMIN".to_string()));
        assert!(result.permissions.contains(&"user:delete:all".to_string()));
        assert!(result.refresh_expires_at > result.access_expires_at);

        let identity = h.facade.authenticate(&result.access_token).await.unwrap();
        assert_eq!(identity.principal_id, h.admin_id);
        assert!(identity.has_role(&RoleCode::ADMIN));
        assert!(identity.permits(ResourceType::User, ActionType::Delete, &Scope::ALL));
        assert!(!identity.permits(ResourceType::User, ActionType::Delete, &Scope::TEAM));
    }

    #[tokio::test]
    async fn login_normalises_the_identifier() {
        let h = harness().await;
        assert!(h.facade.login("  ADMIN@HRIS.com ", ADMIN_PASSWORD).await.is_ok());
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let h = harness().await;

        let unknown = h.facade.login("ghost@hris.com", ADMIN_PASSWORD).await.unwrap_err();
        let wrong = h.facade.login(ADMIN_EMAIL, "not-the-password").await.unwrap_err();
        let malformed = h.facade.login("not-an-email", ADMIN_PASSWORD).await.unwrap_err();

        assert_eq!(unknown, AuthError::InvalidCredentials);
        assert_eq!(wrong, AuthError::InvalidCredentials);
        assert_eq!(malformed, AuthError::InvalidCredentials);
        assert_eq!(unknown.to_string(), wrong.to_string());
    }

    #[tokio::test]
    async fn unknown_email_costs_the_same_hash_work_as_a_wrong_password() {
        let h = harness().await;
        let hasher = Arc::new(CountingHasher {
            inner: Argon2PasswordHasher::with_params(1024, 1, 1).unwrap(),
            verifies: AtomicUsize::new(0),
        });
        let facade = SessionFacade::new(&config(), &h.stores, hasher.clone());

        let unknown = facade.login("nobody@hris.com", ADMIN_PASSWORD).await.unwrap_err();
        let unknown_verifies = hasher.verifies.swap(0, Ordering::SeqCst);
        let wrong = facade.login(ADMIN_EMAIL, "not-the-password").await.unwrap_err();
        let wrong_verifies = hasher.verifies.swap(0, Ordering::SeqCst);

        assert_eq!(unknown, AuthError::InvalidCredentials);
        assert_eq!(wrong, AuthError::InvalidCredentials);
        assert_eq!(unknown_verifies, 1);
        assert_eq!(unknown_verifies, wrong_verifies);
    }

    #[tokio::test]
    async fn every_non_active_status_blocks_login() {
        let h = harness().await;
        let id = register_employee(&h, "jane@hris.com").await;

        for status in UserStatus::ALL.iter().copied().filter(|s| *s != UserStatus::Active) {
            h.accounts.set_status(id, status).await.unwrap();
            let err = h.facade.login("jane@hris.com", EMPLOYEE_PASSWORD).await.unwrap_err();
            assert_eq!(err, AuthError::AccountDisabled, "status {status}");

            // Status is not revealed without the right password.
            let err = h.facade.login("jane@hris.com", "wrong-password").await.unwrap_err();
            assert_eq!(err, AuthError::InvalidCredentials, "status {status}");
        }

        h.accounts.set_status(id, UserStatus::Active).await.unwrap();
        assert!(h.facade.login("jane@hris.com", EMPLOYEE_PASSWORD).await.is_ok());
    }

    #[tokio::test]
    async fn tampered_access_token_is_rejected() {
        let h = harness().await;
        let result = h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();

        let mut tampered = result.access_token.clone();
        tampered.push('x');
        assert_eq!(
            h.facade.authenticate(&tampered).await.unwrap_err(),
            AuthError::InvalidToken
        );
        assert_eq!(
            h.facade.authenticate("").await.unwrap_err(),
            AuthError::InvalidToken
        );
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Refresh sessions
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn refresh_rotates_the_token() {
        let h = harness().await;
        let first = h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();

        let second = h.facade.refresh(&first.refresh_token).await.unwrap();
        assert_ne!(second.refresh_token, first.refresh_token);
        assert_eq!(second.principal.id, h.admin_id);

        assert_eq!(
            h.facade.refresh(&first.refresh_token).await.unwrap_err(),
            AuthError::InvalidRefreshToken
        );
        assert!(h.facade.refresh(&second.refresh_token).await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rotation_has_exactly_one_winner() {
        let h = harness().await;
        let login = h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let facade = h.facade.clone();
            let token = login.refresh_token.clone();
            handles.push(tokio::spawn(async move { facade.refresh(&token).await }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => winners += 1,
                Err(e) => assert_eq!(e, AuthError::InvalidRefreshToken),
            }
        }
        assert_eq!(winners, 1);
        assert_eq!(h.store.session_count(), 1);
    }

    #[tokio::test]
    async fn failed_rotation_write_keeps_the_old_token_usable() {
        let h = harness().await;
        let login = h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
        let before = h.store.session_count();

        h.store.fail_session_inserts(1);
        let err = h.facade.refresh(&login.refresh_token).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.store.session_count(), before);

        let retried = h.facade.refresh(&login.refresh_token).await.unwrap();
        assert_ne!(retried.refresh_token, login.refresh_token);
        assert_eq!(h.store.session_count(), before);
        assert_eq!(
            h.facade.refresh(&login.refresh_token).await.unwrap_err(),
            AuthError::InvalidRefreshToken
        );
    }

    #[tokio::test]
    async fn failed_rotation_at_the_store_is_undone() {
        let h = harness().await;
        let login = h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
        let replacement = RefreshSession::new(h.admin_id, chrono::Duration::hours(1), Utc::now());

        h.store.fail_session_inserts(1);
        let err = h
            .store
            .rotate_session(&login.refresh_token, &replacement)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(h.store.find_session(&login.refresh_token).await.unwrap().is_some());
        assert!(h.store.find_session(&replacement.token).await.unwrap().is_none());

        let old = h
            .store
            .rotate_session(&login.refresh_token, &replacement)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old.token, login.refresh_token);
        assert!(h.store.find_session(&replacement.token).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn owner_lookup_failure_during_refresh_is_retryable() {
        let h = harness().await;
        let flaky = Arc::new(FlakyCredentials {
            inner: h.store.clone(),
            fail_next_lookup: AtomicBool::new(false),
        });
        let stores = AuthStores {
            credentials: flaky.clone(),
            ..h.stores.clone()
        };
        let facade = SessionFacade::new(&config(), &stores, h.hasher.clone());
        let login = facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
        let before = h.store.session_count();

        flaky.fail_next_lookup.store(true, Ordering::SeqCst);
        let err = facade.refresh(&login.refresh_token).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(h.store.session_count(), before);

        assert!(facade.refresh(&login.refresh_token).await.is_ok());
        assert_eq!(h.store.session_count(), before);
    }

    #[tokio::test]
    async fn expired_session_is_removed_on_lookup() {
        let h = harness().await;
        let expired = RefreshSession::new(h.admin_id, chrono::Duration::seconds(-1), Utc::now());
        h.store.insert_session(&expired).await.unwrap();

        let sessions = h.facade.sessions();
        assert_eq!(sessions.lookup(&expired.token).await.unwrap(), SessionLookup::Expired);
        assert_eq!(sessions.lookup(&expired.token).await.unwrap(), SessionLookup::NotFound);
    }

    #[tokio::test]
    async fn refreshing_an_expired_session_fails() {
        let h = harness().await;
        let expired = RefreshSession::new(h.admin_id, chrono::Duration::seconds(-1), Utc::now());
        h.store.insert_session(&expired).await.unwrap();

        assert_eq!(
            h.facade.refresh(&expired.token).await.unwrap_err(),
            AuthError::ExpiredRefreshToken
        );
        assert_eq!(
            h.facade.refresh(&expired.token).await.unwrap_err(),
            AuthError::InvalidRefreshToken
        );
    }

    #[tokio::test]
    async fn purge_removes_only_expired_sessions() {
        let h = harness().await;
        h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();
        for _ in 0..3 {
            let expired =
                RefreshSession::new(h.admin_id, chrono::Duration::seconds(-5), Utc::now());
            h.store.insert_session(&expired).await.unwrap();
        }

        assert_eq!(h.facade.sessions().purge_expired().await.unwrap(), 3);
        assert_eq!(h.store.session_count(), 1);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let h = harness().await;
        let login = h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap();

        h.facade.logout(&login.refresh_token).await.unwrap();
        h.facade.logout(&login.refresh_token).await.unwrap();
        h.facade.logout("never-issued").await.unwrap();

        assert_eq!(
            h.facade.refresh(&login.refresh_token).await.unwrap_err(),
            AuthError::InvalidRefreshToken
        );
    }

    #[tokio::test]
    async fn refresh_for_disabled_owner_is_refused_and_revoked() {
        let h = harness().await;
        let id = register_employee(&h, "jane@hris.com").await;
        let login = h.facade.login("jane@hris.com", EMPLOYEE_PASSWORD).await.unwrap();

        // Flip status underneath the facade, without the session revocation
        // AccountAdmin would perform.
        let mut user = h.store.find_user(id).await.unwrap().unwrap();
        user.status = UserStatus::Suspended;
        h.store.update_user(&user, ExpectedVersion::Any).await.unwrap();

        assert_eq!(
            h.facade.refresh(&login.refresh_token).await.unwrap_err(),
            AuthError::AccountDisabled
        );
        assert_eq!(h.store.session_count(), 0);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authorization
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn admin_scopes_are_matched_exactly() {
        let h = harness().await;
        let admin = h.accounts.get(h.admin_id).await.unwrap();
        let engine = h.facade.engine();

        assert!(engine
            .authorize(&admin, ResourceType::User, ActionType::Delete, &Scope::ALL)
            .await
            .unwrap());
        assert!(!engine
            .authorize(&admin, ResourceType::User, ActionType::Delete, &Scope::TEAM)
            .await
            .unwrap());
        assert!(matches!(
            engine
                .require(&admin, ResourceType::User, ActionType::Delete, &Scope::TEAM)
                .await,
            Err(AuthError::Forbidden(name)) if name == "user:delete:team"
        ));
    }

    #[tokio::test]
    async fn scope_less_permission_covers_every_scope() {
        let h = harness().await;
        let created = h
            .catalog
            .create(NewPermission::new(ResourceType::Document, ActionType::Download, None))
            .await
            .unwrap();
        assert_eq!(created.name.as_str(), "document:download");

        let engine = h.facade.engine();
        engine
            .create_role(NewRole {
                permissions: vec![created.name.clone()],
                ..NewRole::new(code("ARCHIVIST"), "Archivist")
            })
            .await
            .unwrap();
        let id = register_employee(&h, "jane@hris.com").await;
        let user = h
            .accounts
            .assign_roles(id, vec![RoleCode::EMPLOYEE, code("ARCHIVIST")])
            .await
            .unwrap();

        for scope in [Scope::ALL, Scope::TEAM, Scope::SELF, Scope::DEPARTMENT] {
            assert!(engine
                .authorize(&user, ResourceType::Document, ActionType::Download, &scope)
                .await
                .unwrap());
        }
    }

    #[tokio::test]
    async fn token_snapshot_is_stale_but_live_check_is_not() {
        let h = harness().await;
        register_employee(&h, "jane@hris.com").await;
        let login = h.facade.login("jane@hris.com", EMPLOYEE_PASSWORD).await.unwrap();
        let identity = h.facade.authenticate(&login.access_token).await.unwrap();

        let (resource, action) = (ResourceType::LeaveRequest, ActionType::Approve);
        assert!(!identity.permits(resource, action, &Scope::ALL));
        assert!(!h.facade.authorize(&identity, resource, action, &Scope::ALL).await.unwrap());

        let engine = h.facade.engine();
        engine
            .create_role(NewRole {
                permissions: vec![PermissionName::new("leave_request:approve:all")],
                ..NewRole::new(code("MANAGER"), "Manager")
            })
            .await
            .unwrap();
        h.accounts
            .assign_roles(identity.principal_id, vec![RoleCode::EMPLOYEE, code("MANAGER")])
            .await
            .unwrap();

        let reverified = h.facade.authenticate(&login.access_token).await.unwrap();
        assert_eq!(reverified.permissions, identity.permissions);
        assert!(!reverified.permits(resource, action, &Scope::ALL));
        assert!(h.facade.authorize(&identity, resource, action, &Scope::ALL).await.unwrap());
        h.facade.require(&identity, resource, action, &Scope::ALL).await.unwrap();

        // A fresh token picks the grant up.
        let refreshed = h.facade.refresh(&login.refresh_token).await.unwrap();
        assert!(refreshed.permissions.contains(&"leave_request:approve:all".to_string()));
    }

    #[tokio::test]
    async fn live_check_refuses_disabled_principal() {
        let h = harness().await;
        let id = register_employee(&h, "jane@hris.com").await;
        let login = h.facade.login("jane@hris.com", EMPLOYEE_PASSWORD).await.unwrap();
        let identity = h.facade.authenticate(&login.access_token).await.unwrap();

        h.accounts.set_status(id, UserStatus::Locked).await.unwrap();
        assert_eq!(
            h.facade
                .authorize(&identity, ResourceType::Employee, ActionType::Read, &Scope::SELF)
                .await
                .unwrap_err(),
            AuthError::AccountDisabled
        );
    }

    #[tokio::test]
    async fn inactive_grants_are_excluded_and_explained() {
        let h = harness().await;
        let admin = h.accounts.get(h.admin_id).await.unwrap();
        let engine = h.facade.engine();

        h.catalog
            .deactivate(&PermissionName::new("user:delete:all"))
            .await
            .unwrap();

        assert!(!engine
            .authorize(&admin, ResourceType::User, ActionType::Delete, &Scope::ALL)
            .await
            .unwrap());
        let explanation = engine
            .explain(&admin, ResourceType::User, ActionType::Delete, &Scope::ALL)
            .await
            .unwrap();
        assert!(!explanation.granted);
        assert_eq!(explanation.denial_reason.unwrap().kind, DenialKind::InactiveGrant);

        let missing = engine
            .explain(&admin, ResourceType::Training, ActionType::Schedule, &Scope::ALL)
            .await
            .unwrap();
        assert_eq!(missing.denial_reason.unwrap().kind, DenialKind::MissingPermission);
    }

    #[tokio::test]
    async fn deactivated_role_contributes_nothing() {
        let h = harness().await;
        let id = register_employee(&h, "jane@hris.com").await;
        let user = h.accounts.get(id).await.unwrap();
        let engine = h.facade.engine();

        assert!(engine.has_role(&user, &RoleCode::EMPLOYEE).await.unwrap());
        engine.deactivate_role(&RoleCode::EMPLOYEE).await.unwrap();
        assert!(!engine.has_role(&user, &RoleCode::EMPLOYEE).await.unwrap());
        assert!(engine.effective_permission_names(&user).await.unwrap().is_empty());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Role administration
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cycle_is_rejected_and_hierarchy_unchanged() {
        let h = harness().await;
        let engine = h.facade.engine();

        engine.create_role(NewRole::new(code("HEAD"), "Head")).await.unwrap();
        engine
            .create_role(NewRole {
                parent: Some(code("HEAD")),
                ..NewRole::new(code("LEAD"), "Lead")
            })
            .await
            .unwrap();
        engine
            .create_role(NewRole {
                parent: Some(code("LEAD")),
                ..NewRole::new(code("STAFF"), "Staff")
            })
            .await
            .unwrap();

        let err = engine
            .assign_parent(&code("HEAD"), Some(code("STAFF")))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CircularHierarchy(_)));
        assert!(matches!(
            engine.assign_parent(&code("HEAD"), Some(code("HEAD"))).await,
            Err(AuthError::CircularHierarchy(_))
        ));
        assert_eq!(engine.get_role(&code("HEAD")).await.unwrap().parent(), None);

        let chain: Vec<String> = engine
            .ancestors(&code("STAFF"))
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.code.to_string())
            .collect();
        assert_eq!(chain, vec!["LEAD", "HEAD"]);
    }

    #[tokio::test]
    async fn system_role_rejects_every_mutation() {
        let h = harness().await;
        let engine = h.facade.engine();
        engine.create_role(NewRole::new(code("AUDITOR"), "Auditor")).await.unwrap();
        let admin = RoleCode::ADMIN;
        let name = PermissionName::new("role:read:all");

        let results = vec![
            engine.set_permissions(&admin, vec![]).await.map(|_| ()),
            engine.add_permission(&admin, name.clone()).await.map(|_| ()),
            engine.remove_permission(&admin, &name).await.map(|_| ()),
            engine.assign_parent(&admin, Some(code("AUDITOR"))).await.map(|_| ()),
            engine.rename(&admin, "Root", None).await.map(|_| ()),
            engine.activate_role(&admin).await.map(|_| ()),
            engine.deactivate_role(&admin).await.map(|_| ()),
            engine.delete_role(&admin).await,
        ];
        for result in results {
            assert!(matches!(result, Err(AuthError::ProtectedRole(_))), "{result:?}");
        }

        let role = engine.get_role(&admin).await.unwrap();
        assert!(role.active);
        assert!(role.grants(&name));
    }

    #[tokio::test]
    async fn system_roles_cannot_be_created() {
        let h = harness().await;
        let err = h
            .facade
            .engine()
            .create_role(NewRole {
                role_type: hris_auth::RoleType::System,
                ..NewRole::new(code("ROOT"), "Root")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
    }

    #[tokio::test]
    async fn duplicate_role_code_or_name_conflicts() {
        let h = harness().await;
        let engine = h.facade.engine();
        engine.create_role(NewRole::new(code("HR"), "Human Resources")).await.unwrap();

        assert!(matches!(
            engine.create_role(NewRole::new(code("HR"), "Other")).await,
            Err(AuthError::Conflict(_))
        ));
        assert!(matches!(
            engine.create_role(NewRole::new(code("HR2"), "Human Resources")).await,
            Err(AuthError::Conflict(_))
        ));
        assert!(matches!(
            engine
                .create_role(NewRole {
                    permissions: vec![PermissionName::new("nope:nope")],
                    ..NewRole::new(code("HR3"), "HR Three")
                })
                .await,
            Err(AuthError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn stale_role_save_is_a_conflict() {
        let h = harness().await;
        let engine = h.facade.engine();
        engine.create_role(NewRole::new(code("OPS"), "Operations")).await.unwrap();

        let stale = h.store.find_role(&code("OPS")).await.unwrap().unwrap();
        engine.rename(&code("OPS"), "Operations Team", None).await.unwrap();

        let err = h
            .store
            .update_role(&stale, ExpectedVersion::Exact(stale.version))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(engine.get_role(&code("OPS")).await.unwrap().name, "Operations Team");
    }

    #[tokio::test]
    async fn delete_role_requires_no_assignments_and_detaches_children() {
        let h = harness().await;
        let engine = h.facade.engine();
        engine.create_role(NewRole::new(code("PARENT"), "Parent")).await.unwrap();
        engine
            .create_role(NewRole {
                parent: Some(code("PARENT")),
                ..NewRole::new(code("CHILD"), "Child")
            })
            .await
            .unwrap();

        let id = register_employee(&h, "jane@hris.com").await;
        h.accounts
            .assign_roles(id, vec![code("PARENT")])
            .await
            .unwrap();
        assert!(matches!(
            engine.delete_role(&code("PARENT")).await,
            Err(AuthError::Conflict(_))
        ));

        h.accounts.assign_roles(id, vec![RoleCode::EMPLOYEE]).await.unwrap();
        let before = engine.get_role(&code("CHILD")).await.unwrap();
        engine.delete_role(&code("PARENT")).await.unwrap();
        let after = engine.get_role(&code("CHILD")).await.unwrap();
        assert_eq!(after.parent(), None);
        assert_eq!(after.version, before.version + 1);

        // A save prepared before the detach is stale.
        let err = h
            .store
            .update_role(&before, ExpectedVersion::Exact(before.version))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert!(matches!(
            engine.get_role(&code("PARENT")).await,
            Err(AuthError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn role_queries() {
        let h = harness().await;
        let engine = h.facade.engine();
        engine
            .create_role(NewRole {
                description: Some("Payroll processing".to_string()),
                ..NewRole::new(code("PAYROLL_CLERK"), "Clerk")
            })
            .await
            .unwrap();
        engine.deactivate_role(&code("PAYROLL_CLERK")).await.unwrap();

        assert_eq!(engine.list_roles().await.unwrap().len(), 3);
        assert_eq!(engine.list_active_roles().await.unwrap().len(), 2);
        let defaults = engine.list_default_roles().await.unwrap();
        assert_eq!(defaults.len(), 1);
        assert_eq!(defaults[0].code, RoleCode::EMPLOYEE);
        assert_eq!(engine.search_roles("payroll").await.unwrap().len(), 1);
        assert_eq!(engine.search_roles("ADMIN").await.unwrap().len(), 1);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Permission catalogue
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn scope_less_and_explicit_all_are_the_same_triple() {
        let h = harness().await;
        h.catalog
            .create(NewPermission::new(ResourceType::Training, ActionType::Schedule, None))
            .await
            .unwrap();

        let err = h
            .catalog
            .create(NewPermission::new(
                ResourceType::Training,
                ActionType::Schedule,
                Some(Scope::ALL),
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicatePermission(_)));

        // Seeded triple with explicit scope.
        let err = h
            .catalog
            .create(NewPermission::new(ResourceType::User, ActionType::Delete, None))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::DuplicatePermission(_)));
    }

    #[tokio::test]
    async fn catalogue_queries() {
        let h = harness().await;

        assert_eq!(h.catalog.list_all().await.unwrap().len(), 26);
        let payroll = h.catalog.list_by_category("PAYROLL").await.unwrap();
        assert!(!payroll.is_empty());
        assert!(payroll.iter().all(|p| p.sensitive));
        assert_eq!(
            h.catalog.list_by_resource(ResourceType::User).await.unwrap().len(),
            4
        );
        assert!(!h.catalog.search("salary").await.unwrap().is_empty());
        assert!(matches!(
            h.catalog.get_by_name(&PermissionName::new("nope:nope")).await,
            Err(AuthError::NotFound { .. })
        ));

        let name = PermissionName::new("role:read:all");
        h.catalog.deactivate(&name).await.unwrap();
        assert_eq!(h.catalog.list_active().await.unwrap().len(), 25);
        h.catalog.activate(&name).await.unwrap();
        assert_eq!(h.catalog.list_active().await.unwrap().len(), 26);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Accounts
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn registration_assigns_default_role_and_rejects_duplicates() {
        let h = harness().await;
        let id = register_employee(&h, "Jane@HRIS.com").await;
        let user = h.accounts.get(id).await.unwrap();
        assert_eq!(user.email, "jane@hris.com");
        assert!(user.roles().contains(&RoleCode::EMPLOYEE));
        assert_ne!(user.password_hash, EMPLOYEE_PASSWORD);

        let duplicate = h
            .accounts
            .register(NewAccount {
                email: "jane@hris.com".to_string(),
                display_name: "Other".to_string(),
                password: EMPLOYEE_PASSWORD.to_string(),
                role_codes: Vec::new(),
            })
            .await;
        assert!(matches!(duplicate, Err(AuthError::Conflict(_))));

        let unknown_role = h
            .accounts
            .register(NewAccount {
                email: "bob@hris.com".to_string(),
                display_name: "Bob".to_string(),
                password: EMPLOYEE_PASSWORD.to_string(),
                role_codes: vec![code("NOPE")],
            })
            .await;
        assert!(matches!(unknown_role, Err(AuthError::NotFound { .. })));
    }

    #[tokio::test]
    async fn disabling_a_principal_revokes_its_sessions() {
        let h = harness().await;
        let id = register_employee(&h, "jane@hris.com").await;
        let login = h.facade.login("jane@hris.com", EMPLOYEE_PASSWORD).await.unwrap();

        h.accounts.set_status(id, UserStatus::Suspended).await.unwrap();
        assert_eq!(
            h.facade.refresh(&login.refresh_token).await.unwrap_err(),
            AuthError::InvalidRefreshToken
        );
    }

    #[tokio::test]
    async fn password_change_signs_out_everywhere() {
        let h = harness().await;
        let id = register_employee(&h, "jane@hris.com").await;
        let login = h.facade.login("jane@hris.com", EMPLOYEE_PASSWORD).await.unwrap();

        h.accounts.change_password(id, "Brand-New@456").await.unwrap();

        assert_eq!(
            h.facade.refresh(&login.refresh_token).await.unwrap_err(),
            AuthError::InvalidRefreshToken
        );
        assert_eq!(
            h.facade.login("jane@hris.com", EMPLOYEE_PASSWORD).await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert!(h.facade.login("jane@hris.com", "Brand-New@456").await.is_ok());
        assert!(matches!(
            h.accounts.change_password(id, "short").await,
            Err(AuthError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn deleting_a_principal_revokes_sessions() {
        let h = harness().await;
        let id = register_employee(&h, "jane@hris.com").await;
        let login = h.facade.login("jane@hris.com", EMPLOYEE_PASSWORD).await.unwrap();

        h.accounts.delete_user(id).await.unwrap();

        assert_eq!(
            h.facade.sessions().lookup(&login.refresh_token).await.unwrap(),
            SessionLookup::NotFound
        );
        assert_eq!(
            h.facade.login("jane@hris.com", EMPLOYEE_PASSWORD).await.unwrap_err(),
            AuthError::InvalidCredentials
        );
        assert!(matches!(h.accounts.get(id).await, Err(AuthError::NotFound { .. })));
    }

    #[tokio::test]
    async fn last_administrator_is_protected() {
        let h = harness().await;

        assert!(matches!(h.accounts.delete_user(h.admin_id).await, Err(AuthError::Conflict(_))));
        assert!(matches!(
            h.accounts.set_status(h.admin_id, UserStatus::Locked).await,
            Err(AuthError::Conflict(_))
        ));
        assert!(matches!(
            h.accounts.assign_roles(h.admin_id, vec![RoleCode::EMPLOYEE]).await,
            Err(AuthError::Conflict(_))
        ));

        h.accounts
            .register(NewAccount {
                email: "second-admin@hris.com".to_string(),
                display_name: "Second Admin".to_string(),
                password: ADMIN_PASSWORD.to_string(),
                role_codes: vec![RoleCode::ADMIN],
            })
            .await
            .unwrap();
        h.accounts.delete_user(h.admin_id).await.unwrap();
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seeding / storage
    // ─────────────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn seeding_twice_changes_nothing() {
        let h = harness().await;
        let report = Seeder::new(h.stores.clone(), h.hasher.clone())
            .run(&admin_seed())
            .await
            .unwrap();

        assert_eq!(report.permissions_created, 0);
        assert_eq!(report.roles_created, 0);
        assert_eq!(report.admin_created, None);
        assert_eq!(h.store.count_users().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn offline_storage_is_retryable() {
        let h = harness().await;
        h.store.set_offline(true);

        let err = h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap_err();
        assert!(matches!(err, AuthError::StorageUnavailable(_)));
        assert!(err.is_retryable());

        h.store.set_offline(false);
        assert!(h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.is_ok());
    }

    #[tokio::test]
    async fn slow_storage_hits_the_deadline() {
        let h = harness().await;
        h.store.set_latency(Duration::from_millis(500));

        let err = h.facade.login(ADMIN_EMAIL, ADMIN_PASSWORD).await.unwrap_err();
        assert_eq!(
            err,
            AuthError::StorageUnavailable("find_user_by_email timed out".to_string())
        );
    }

    #[tokio::test]
    async fn session_insert_requires_an_existing_owner() {
        let h = harness().await;
        let orphan = RefreshSession::new(UserId::new(), chrono::Duration::hours(1), Utc::now());
        assert!(matches!(
            h.store.insert_session(&orphan).await,
            Err(StoreError::Conflict(_))
        ));
    }

    mod hierarchy_props {
        use super::*;
        use proptest::prelude::*;

        fn build_chain(len: usize) -> Vec<RoleCode> {
            (0..len).map(|i| code(&format!("R{i}"))).collect()
        }

        proptest! {
            #![proptest_config(ProptestConfig { cases: 32, ..ProptestConfig::default() })]

            /// Linking the head of any chain under one of its descendants fails.
            #[test]
            fn closing_a_chain_is_always_rejected(len in 2usize..8, pick in 0usize..8) {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .unwrap();
                runtime.block_on(async {
                    let store = Arc::new(InMemoryAuthStore::new());
                    let stores = AuthStores::from_shared(store.clone());
                    let engine = hris_auth::AuthorizationEngine::new(
                        stores.roles.clone(),
                        stores.permissions.clone(),
                    );
                    let chain = build_chain(len);
                    for (i, role) in chain.iter().enumerate() {
                        engine
                            .create_role(NewRole {
                                parent: i.checked_sub(1).map(|p| chain[p].clone()),
                                ..NewRole::new(role.clone(), format!("Role {i}"))
                            })
                            .await
                            .unwrap();
                    }

                    let descendant = &chain[pick % len];
                    let result = engine.assign_parent(&chain[0], Some(descendant.clone())).await;
                    prop_assert!(matches!(result, Err(AuthError::CircularHierarchy(_))));
                    let root = engine.get_role(&chain[0]).await.unwrap();
                    prop_assert_eq!(root.parent(), None);
                    Ok::<(), TestCaseError>(())
                })?;
            }
        }
    }
}
