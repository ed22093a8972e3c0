//! User resource - HMC users and their roles

use declarative::diff::ChangeSet;
use declarative::property::{to_bool, to_int, to_string};
use declarative::{
    ApplyContext, ArtificialProperty, ByName, Converger, Error, ManagedResource, Outcome,
    PropertySpec, PropertyTable, ResolveContext, Result, Scope, TargetState, apply,
};
use hmckit::{Kind, Operation, Properties, Resource, ResourceClient, Selector};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::LazyLock;

/// Write-only: the console never reports it back.
fn eq_write_only(desired: &Value, live: &Value, _name: &str) -> Result<bool> {
    Ok(live.is_null() || desired == live)
}

static PROPERTIES: LazyLock<PropertyTable> = LazyLock::new(|| {
    PropertyTable::new(
        Kind::User,
        [
            PropertySpec::create_only("type"),
            PropertySpec::create_update("description").cast(to_string),
            PropertySpec::create_update("disabled").cast(to_bool),
            PropertySpec::create_update("authentication_type"),
            PropertySpec::create_update("password").compare_with(eq_write_only),
            PropertySpec::create_update("force_password_change").cast(to_bool),
            PropertySpec::internal("password_rule_uri", true, true),
            PropertySpec::internal("ldap_server_definition_uri", true, true),
            PropertySpec::create_update("userid_on_ldap_server"),
            PropertySpec::create_update("session_timeout").cast(to_int),
            PropertySpec::create_update("verify_timeout").cast(to_int),
            PropertySpec::create_update("idle_timeout").cast(to_int),
            PropertySpec::create_update("min_pw_change_time").cast(to_int),
            PropertySpec::create_update("max_failed_logins").cast(to_int),
            PropertySpec::create_update("disable_delay").cast(to_int),
            PropertySpec::create_update("inactivity_timeout").cast(to_int),
            PropertySpec::create_update("disruptive_pw_required").cast(to_bool),
            PropertySpec::create_update("disruptive_text_required").cast(to_bool),
            PropertySpec::create_update("allow_remote_access").cast(to_bool),
            PropertySpec::create_update("allow_management_interfaces").cast(to_bool),
            PropertySpec::create_update("max_web_services_api_sessions").cast(to_int),
            PropertySpec::create_update("web_services_api_session_idle_timeout").cast(to_int),
            PropertySpec::create_update("multi_factor_authentication_required").cast(to_bool),
            PropertySpec::create_update("force_shared_secret_key_change").cast(to_bool),
            PropertySpec::create_update("email_address"),
            PropertySpec::read_only("user_roles"),
            PropertySpec::read_only("name"),
            PropertySpec::read_only("object_uri"),
            PropertySpec::read_only("object_id"),
            PropertySpec::read_only("parent"),
            PropertySpec::read_only("class"),
            PropertySpec::read_only("user_pattern_uri"),
            PropertySpec::read_only("password_expires"),
            PropertySpec::read_only("replication_overwrite_possible"),
        ],
    )
});

/// `user_role_names`: the complete set of roles the user holds.
struct RoleNames;

impl ArtificialProperty for RoleNames {
    fn fields(&self) -> &[&'static str] {
        &["user_role_names"]
    }

    fn resolve(&self, desired: &Properties, ctx: &ResolveContext<'_>) -> Result<ChangeSet> {
        let names: Vec<String> = serde_json::from_value(
            desired.get("user_role_names").cloned().unwrap_or(Value::Null),
        )
        .map_err(|_| Error::parameter("\"user_role_names\" must be a list of strings"))?;

        let mut wanted = BTreeSet::new();
        for name in &names {
            let role = ctx
                .lookup
                .find_by_name(Kind::UserRole, None, name)?
                .ok_or_else(|| Error::ReferenceNotFound {
                    field: "user_role_names".to_string(),
                    kind: Kind::UserRole,
                    name: name.clone(),
                    scope: None,
                })?;
            wanted.insert(role.uri);
        }

        let held: BTreeSet<String> = ctx
            .live
            .and_then(|live| live.get("user-roles"))
            .and_then(Value::as_array)
            .map(|roles| {
                roles
                    .iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut changes = ChangeSet::default();
        for uri in wanted.difference(&held) {
            changes.side_ops.push(Operation::AddUserRole {
                user_role_uri: uri.clone(),
            });
        }
        for uri in held.difference(&wanted) {
            changes.side_ops.push(Operation::RemoveUserRole {
                user_role_uri: uri.clone(),
            });
        }
        Ok(changes)
    }
}

/// Name of the resource at `uri`, if it can be found.
fn name_of(client: &dyn ResourceClient, kind: Kind, uri: &str) -> Result<Option<String>> {
    Ok(client
        .find_optional(&Selector::uri(kind, uri))?
        .map(|r| r.name().to_string()))
}

/// User handler
#[derive(Debug, Clone)]
pub struct User {
    name: String,
}

impl User {
    pub fn new(name: String) -> Self {
        Self { name }
    }

    fn locate(&self, ctx: &ApplyContext<'_>) -> Result<Option<Resource>> {
        Ok(ctx
            .client
            .find_optional(&Selector::named(Kind::User, &self.name))?)
    }

    /// Properties with the referenced names added and the password removed.
    fn result(&self, ctx: &ApplyContext<'_>, changed: bool, user: &Resource) -> Result<Outcome> {
        let mut properties = user.properties.clone();
        properties.remove("password");

        let mut role_names = Vec::new();
        if let Some(roles) = user.get("user-roles").and_then(Value::as_array) {
            for uri in roles.iter().filter_map(Value::as_str) {
                if let Some(name) = name_of(ctx.client, Kind::UserRole, uri)? {
                    role_names.push(Value::String(name));
                }
            }
        }
        properties.insert("user-role-names".to_string(), Value::Array(role_names));

        for (uri_property, name_property, kind) in [
            ("password-rule-uri", "password-rule-name", Kind::PasswordRule),
            (
                "ldap-server-definition-uri",
                "ldap-server-definition-name",
                Kind::LdapServerDefinition,
            ),
        ] {
            let name = match user.get(uri_property) {
                None => continue,
                Some(Value::String(uri)) => name_of(ctx.client, kind, uri)?,
                Some(_) => None,
            };
            properties.insert(name_property.to_string(), name.map_or(Value::Null, Value::String));
        }
        Ok(Outcome::new(changed, properties))
    }
}

impl ManagedResource for User {
    fn kind(&self) -> Kind {
        Kind::User
    }

    fn describe(&self) -> String {
        format!("user '{}'", self.name)
    }

    fn supported_states(&self) -> &'static [TargetState] {
        &[TargetState::Absent, TargetState::Present, TargetState::Facts]
    }

    fn ensure_absent(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        match self.locate(ctx)? {
            Some(user) => {
                apply::delete(ctx, &user)?;
                Ok(Outcome::absent(true))
            }
            None => Ok(Outcome::absent(false)),
        }
    }

    fn ensure_state(
        &self,
        _target: TargetState,
        desired: &Properties,
        ctx: &ApplyContext<'_>,
    ) -> Result<Outcome> {
        let password_rule = ByName::new(
            "password_rule_name",
            Kind::PasswordRule,
            "password_rule_uri",
            Scope::Global,
        );
        let ldap = ByName::new(
            "ldap_server_definition_name",
            Kind::LdapServerDefinition,
            "ldap_server_definition_uri",
            Scope::Global,
        );
        let converger = Converger::new(&PROPERTIES)
            .rule(&password_rule)
            .rule(&ldap)
            .rule(&RoleNames);

        match self.locate(ctx)? {
            None => {
                let user = converger.create(ctx, None, &self.name, desired)?;
                self.result(ctx, true, &user)
            }
            Some(mut user) => {
                apply::refresh(ctx, &mut user)?;
                let changed = converger.update(ctx, &mut user, desired)?;
                self.result(ctx, changed, &user)
            }
        }
    }

    fn facts(&self, ctx: &ApplyContext<'_>) -> Result<Outcome> {
        let mut user = self
            .locate(ctx)?
            .ok_or_else(|| Error::parameter(format!("{} does not exist", self.describe())))?;
        apply::refresh(ctx, &mut user)?;
        self.result(ctx, false, &user)
    }
}
