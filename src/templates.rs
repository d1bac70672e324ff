//! Predefined vendor profiles.
//!
//! This module contains factory functions building a [`DeviceProfile`] for
//! each supported device family, pre-configured with its prompts, error
//! messages, mode transitions and idle normalization, plus the identity
//! pattern each one is registered under.

use std::collections::BTreeMap;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::device::{
    ContextModes, DeviceProfile, LOGIN, LOGIN_ENABLE, LOGIN_OR_ENABLE, ProfileDiagnostics,
    PtyRequest, SessionStep,
};
use crate::error::ConnectError;
use crate::registry::ProfileRegistry;

/// Built-in template names, in registration priority order.
pub const BUILTIN_TEMPLATES: &[&str] = &[
    "cisco_asa",
    "cisco_ios",
    "cisco_nxos",
    "fortigate",
    "hillstone",
    "dptech",
    "huawei_usg",
    "juniper_srx",
    "juniper_ssg",
    "paloalto_panos",
];

/// Capability tags used to describe template compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCapability {
    LoginMode,
    EnableMode,
    ConfigMode,
    ContextModes,
    Pty,
    OutputFormat,
}

/// Metadata for a built-in template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TemplateMetadata {
    pub name: String,
    pub vendor: String,
    pub family: String,
    /// Identity pattern the template is registered under.
    pub pattern: String,
    pub template_version: String,
    pub capabilities: Vec<TemplateCapability>,
}

fn metadata_for(name: &str) -> Option<TemplateMetadata> {
    use TemplateCapability::*;
    let (vendor, family, capabilities) = match name {
        "cisco_asa" => ("Cisco", "ASA 9.x+", vec![LoginMode, EnableMode, ConfigMode]),
        "cisco_ios" => ("Cisco", "IOS", vec![LoginMode, EnableMode, ConfigMode]),
        "cisco_nxos" => ("Cisco", "NX-OS", vec![LoginMode, ConfigMode, Pty]),
        "fortigate" => ("Fortinet", "FortiGate-VM64-KVM", vec![LoginMode, ContextModes]),
        "hillstone" => ("Hillstone", "SG-6000", vec![LoginMode, ConfigMode, Pty]),
        "dptech" => ("DPtech", "FW1000", vec![LoginMode, ConfigMode]),
        "huawei_usg" => ("Huawei", "USG", vec![LoginMode, ConfigMode]),
        "juniper_srx" => ("Juniper", "SRX 6.x", vec![LoginMode, ConfigMode]),
        "juniper_ssg" => ("Juniper", "SSG ScreenOS", vec![LoginMode]),
        "paloalto_panos" => (
            "Palo Alto",
            "PAN-OS",
            vec![LoginMode, ConfigMode, Pty, OutputFormat],
        ),
        _ => return None,
    };
    Some(TemplateMetadata {
        name: name.to_string(),
        vendor: vendor.to_string(),
        family: family.to_string(),
        pattern: identity_pattern(name)?.to_string(),
        template_version: "1.0.0".to_string(),
        capabilities,
    })
}

/// Identity pattern (`vendor.type.version`) a template is registered under.
pub fn identity_pattern(name: &str) -> Option<&'static str> {
    let pattern = match name {
        "cisco_asa" => r"(?i)cisco\.asa[a-z]{0,}\.(9|[0-9]{1,})\..*",
        "cisco_ios" => r"(?i)cisco\.ios\..*",
        "cisco_nxos" => r"(?i)cisco\.NX-OS\..*",
        "fortigate" => r"(?i)fortinet\.FortiGate-VM64-KVM\..*",
        "hillstone" => r"(?i)hillstone\.SG-6000-VM01\..*",
        "dptech" => r"(?i)dptech\.fw1000\..*",
        "huawei_usg" => r"(?i)huawei\.usg\..*",
        "juniper_srx" => r"(?i)juniper\.srx\.6\.[0-9]{1,}",
        "juniper_ssg" => r"(?i)juniper\.ssg\..*",
        "paloalto_panos" => r"(?i)paloalto\.pan-os\..*",
        _ => return None,
    };
    Some(pattern)
}

/// Returns names of all built-in templates.
pub fn available_templates() -> &'static [&'static str] {
    BUILTIN_TEMPLATES
}

/// Returns metadata for all built-in templates.
pub fn template_catalog() -> Vec<TemplateMetadata> {
    BUILTIN_TEMPLATES
        .iter()
        .filter_map(|name| metadata_for(name))
        .collect()
}

/// Returns metadata for one template by name (case-insensitive).
pub fn template_metadata(name: &str) -> Result<TemplateMetadata, ConnectError> {
    let key = name.to_ascii_lowercase();
    metadata_for(&key).ok_or_else(|| ConnectError::ProfileNotFound(name.to_string()))
}

/// Creates a built-in template by name (case-insensitive).
pub fn by_name(name: &str) -> Result<DeviceProfile, ConnectError> {
    match name.to_ascii_lowercase().as_str() {
        "cisco_asa" => cisco_asa(),
        "cisco_ios" => cisco_ios(),
        "cisco_nxos" => cisco_nxos(),
        "fortigate" => fortigate(),
        "hillstone" => hillstone(),
        "dptech" => dptech(),
        "huawei_usg" => huawei_usg(),
        "juniper_srx" => juniper_srx(),
        "juniper_ssg" => juniper_ssg(),
        "paloalto_panos" => paloalto_panos(),
        _ => Err(ConnectError::ProfileNotFound(name.to_string())),
    }
}

/// Registry holding every built-in template in priority order.
pub fn builtin_registry() -> Result<ProfileRegistry, ConnectError> {
    let mut registry = ProfileRegistry::new();
    for name in BUILTIN_TEMPLATES {
        let pattern =
            identity_pattern(name).ok_or_else(|| ConnectError::ProfileNotFound(name.to_string()))?;
        registry.register(pattern, Arc::new(by_name(name)?))?;
    }
    Ok(registry)
}

/// Builds a template by name and returns its diagnostics.
pub fn diagnose_template(name: &str) -> Result<ProfileDiagnostics, ConnectError> {
    Ok(by_name(name)?.diagnose())
}

/// Builds a template by name and exports diagnostics as pretty JSON.
pub fn diagnose_template_json(name: &str) -> Result<String, ConnectError> {
    let report = diagnose_template(name)?;
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Exports diagnostics for all built-in templates as pretty JSON.
pub fn diagnose_all_templates_json() -> Result<String, ConnectError> {
    let mut reports = BTreeMap::new();
    for name in BUILTIN_TEMPLATES {
        reports.insert((*name).to_string(), diagnose_template(name)?);
    }
    Ok(serde_json::to_string_pretty(&reports)?)
}

/// Cisco ASA 9.x and later.
pub fn cisco_asa() -> Result<DeviceProfile, ConnectError> {
    let login = r"[[:alnum:]]{1,}(-[[:alnum:]]+){0,}> $";
    let enable = r"[[:alnum:]]{1,}(-[[:alnum:]]+){0,}# $";
    DeviceProfile::new("cisco_asa")
        .with_mode(LOGIN_OR_ENABLE, [login, enable])?
        .with_mode(LOGIN, [login])?
        .with_mode(LOGIN_ENABLE, [enable])?
        .with_mode(
            "configure_terminal",
            [r"[[:alnum:]]{1,}(-[[:alnum:]]+){0,}\(config\)# $"],
        )?
        .with_error_patterns([r"^ERROR: "])?
        .with_start_mode(LOGIN_OR_ENABLE)
        .with_transition(LOGIN_ENABLE, "configure_terminal", ["configure terminal"])
        .with_transition("configure_terminal", LOGIN_ENABLE, ["exit"])
        // Either form is accepted depending on the release.
        .with_normalize_step(SessionStep::new("terminal pager 0"))
        .with_normalize_step(SessionStep::new("terminal pager lines 0"))
        .validate()
}

/// Cisco IOS.
pub fn cisco_ios() -> Result<DeviceProfile, ConnectError> {
    let login = r"^[[:alnum:]._-]+> ?$";
    let enable = r"[[:alnum:]]{1,}(-[[:alnum:]]+){0,}#$";
    DeviceProfile::new("cisco_ios")
        .with_mode(LOGIN_OR_ENABLE, [login, enable])?
        .with_mode(LOGIN, [login])?
        .with_mode(LOGIN_ENABLE, [enable])?
        .with_mode(
            "configure_terminal",
            [r"[[:alnum:]]{1,}(-[[:alnum:]]+){0,}\(config\)#$"],
        )?
        .with_error_patterns([
            r"^Command authorization failed\.$",
            r"^% ",
            r"^Command rejected:",
        ])?
        .with_start_mode(LOGIN_OR_ENABLE)
        .with_transition(LOGIN_ENABLE, "configure_terminal", ["config terminal"])
        .with_transition("configure_terminal", LOGIN_ENABLE, ["exit"])
        .with_normalize_step(SessionStep::new("terminal length 0"))
        .validate()
}

/// Cisco NX-OS.
pub fn cisco_nxos() -> Result<DeviceProfile, ConnectError> {
    DeviceProfile::new("cisco_nxos")
        .with_mode(LOGIN, [r"[[:alnum:]]{1,}(-[[:alnum:]]+){0,}# $"])?
        .with_mode(
            "configure_terminal",
            [r"[[:alnum:]]{1,}(-[[:alnum:]]+){0,}\(config\)# $"],
        )?
        .with_error_patterns([
            r"^Command authorization failed\.$",
            r"^% ",
            r"^% Invalid command at '\^' marker\.",
        ])?
        .with_transition(LOGIN, "configure_terminal", ["configure"])
        .with_transition("configure_terminal", LOGIN, ["exit"])
        .with_pty(PtyRequest::default())
        .validate()
}

/// FortiGate VM. Request modes other than `login` and `global` name a VDOM.
pub fn fortigate() -> Result<DeviceProfile, ConnectError> {
    DeviceProfile::new("fortigate")
        .with_mode(LOGIN, [r"[[:alnum:]]{1,}[[:alnum:]_-]{0,} # $"])?
        .with_mode("global", [r"[[:alnum:]]{1,}[[:alnum:]_-]{0,} \(global\) # $"])?
        .with_error_patterns([
            r"^Unknown action 0$",
            r"^command parse error",
            r"^value parse error",
            r"^Command fail. Return code",
            r"^please use 'end' to return to root shell",
            r"^entry not found in datasource",
            r"^node_check_object fail",
        ])?
        .with_transition(LOGIN, "global", ["config global"])
        .with_transition("global", LOGIN, ["end"])
        .with_context_modes(ContextModes {
            base_mode: LOGIN.to_string(),
            prompt: r"[[:alnum:]]{1,}[[:alnum:]_-]{0,} \({context}\) # $".to_string(),
            enter: vec!["config vdom\n\tedit {context}".to_string()],
            leave: vec!["end".to_string()],
            global: Some((
                "global".to_string(),
                "config global".to_string(),
                "end".to_string(),
            )),
        })?
        .with_normalize_step(SessionStep::new(
            "config system console\n\tset output standard\nend",
        ))
        .validate()
}

/// Hillstone SG-6000.
pub fn hillstone() -> Result<DeviceProfile, ConnectError> {
    DeviceProfile::new("hillstone")
        .with_mode(LOGIN, [r"[[:alnum:]._~-]+(\([[:alnum:]]+\))?# ?$"])?
        .with_mode(
            "configure",
            [r"[[:alnum:]._~-]+(\([[:alnum:]]+\))?\(config\)# ?$"],
        )?
        .with_error_patterns([
            r"\^-+incomplete command",
            r"\^-+unrecognized keyword\s+",
            r"^Error:\s+",
        ])?
        .with_transition(LOGIN, "configure", ["configure"])
        .with_transition("configure", LOGIN, ["exit"])
        .with_pty(PtyRequest::default())
        .with_normalize_step(SessionStep::new("terminal length 0"))
        .validate()
}

/// DPtech FW1000.
pub fn dptech() -> Result<DeviceProfile, ConnectError> {
    DeviceProfile::new("dptech")
        .with_mode(LOGIN, [r"<[[:alnum:]_.-]+>"])?
        .with_mode("configure", [r"\[[[:alnum:]_.-]+\]"])?
        .with_error_patterns([r"% Unknown command\."])?
        .with_transition(LOGIN, "configure", ["conf-mode"])
        .with_transition("configure", LOGIN, ["end"])
        .validate()
}

/// Huawei USG.
pub fn huawei_usg() -> Result<DeviceProfile, ConnectError> {
    DeviceProfile::new("huawei_usg")
        .with_mode(
            LOGIN,
            [r"^<[[:alnum:]]{1,}[[:digit:]]{1,}[[:alnum:]]{1,}>$"],
        )?
        .with_mode(
            "system_View",
            [r"^\[[[:alnum:]]{1,}[[:digit:]]{1,}[[:alnum:]]{1,}\]"],
        )?
        .with_error_patterns([r"^ ?Error: ?"])?
        .with_transition(LOGIN, "system_View", ["system-view"])
        .with_transition("system_View", LOGIN, ["quit"])
        .validate()
}

/// Juniper SRX running 6.x.
pub fn juniper_srx() -> Result<DeviceProfile, ConnectError> {
    let configure = r"^[[:alnum:]_]{1,}[.]{0,1}[[:alnum:]_-]{0,}@[[:alnum:]._-]+# $";
    let mut profile = DeviceProfile::new("juniper_srx")
        .with_mode(
            LOGIN,
            [r"^[[:alnum:]_]{1,}[.]{0,1}[[:alnum:]_-]{0,}@[[:alnum:]._-]+> $"],
        )?
        .with_error_patterns([
            r"^syntax error\.$",
            r"^unknown command\.$",
            r"^missing argument\.$",
            r"\^$",
            r"^error:",
        ])?;
    for (mode, command) in [
        ("configure", "configure"),
        ("configure_private", "configure private"),
        ("configure_exclusive", "configure exclusive"),
    ] {
        profile = profile
            .with_mode(mode, [configure])?
            .with_transition(LOGIN, mode, [command])
            .with_transition(mode, LOGIN, ["exit"]);
    }
    profile.validate()
}

/// Juniper SSG running ScreenOS.
pub fn juniper_ssg() -> Result<DeviceProfile, ConnectError> {
    DeviceProfile::new("juniper_ssg")
        .with_mode(LOGIN, [r".*-> $"])?
        .with_error_patterns([
            r"\^-+unknown keyword .+",
            r"\^-+command not completed",
            r": Duplicate entry",
            r"^Service: Not found",
            r"^Failed command -",
        ])?
        .validate()
}

/// Palo Alto PAN-OS. The request `format` selects the config output format.
pub fn paloalto_panos() -> Result<DeviceProfile, ConnectError> {
    let user = r"[[:alnum:]_]{1,}[.]{0,1}[[:alnum:]_-]{0,}[.]{0,1}[[:alnum:]_-]{0,}@[[:alnum:]._-]+";
    DeviceProfile::new("paloalto_panos")
        .with_mode(LOGIN, [format!("{user}> $")])?
        .with_mode("configure", [format!("{user}# $")])?
        .with_error_patterns([
            r"Invalid syntax\.",
            r"^Server error :",
            r"^Validation Error:",
            r"^Unknown command:\s+",
        ])?
        .with_transition(LOGIN, "configure", ["configure"])
        .with_transition("configure", LOGIN, ["exit"])
        .with_pty(PtyRequest::default())
        .with_format_command("set cli config-output-format {format}")
        .with_normalize_step(SessionStep::new("set cli pager off"))
        .validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{VendorProfile, first_match};
    use crate::protocol::CliRequest;

    fn matches(profile: &DeviceProfile, mode: &str, line: &str) -> bool {
        let prompts = profile.prompts_for(mode).expect("mode should exist");
        first_match(prompts, line).is_some()
    }

    #[test]
    fn every_builtin_template_builds_cleanly() {
        for name in BUILTIN_TEMPLATES {
            let report = diagnose_template(name).expect("template should build");
            assert!(!report.has_issues(), "{name}: {report:?}");
            assert!(report.total_modes > 0);
        }
    }

    #[test]
    fn by_name_is_case_insensitive() {
        let profile = by_name("CiScO_AsA").expect("asa template should load");
        assert_eq!(profile.start_mode(), LOGIN_OR_ENABLE);
    }

    #[test]
    fn by_name_returns_not_found_for_unknown_name() {
        let err = match by_name("unknown-vendor") {
            Ok(_) => panic!("unknown template should fail"),
            Err(err) => err,
        };
        assert!(matches!(err, ConnectError::ProfileNotFound(_)));
    }

    #[test]
    fn builtin_registry_resolves_identities() {
        let registry = builtin_registry().expect("registry");
        assert_eq!(registry.len(), BUILTIN_TEMPLATES.len());
        let cases = [
            ("cisco.asa.9.8(2)", "cisco_asa"),
            ("Cisco.ASAv.9.12", "cisco_asa"),
            ("cisco.ios.15.2", "cisco_ios"),
            ("cisco.nx-os.7.0", "cisco_nxos"),
            ("fortinet.fortigate-vm64-kvm.5.6", "fortigate"),
            ("hillstone.SG-6000-VM01.5.5", "hillstone"),
            ("dptech.fw1000.1", "dptech"),
            ("huawei.usg.6000v", "huawei_usg"),
            ("juniper.srx.6.2", "juniper_srx"),
            ("juniper.ssg.6.3", "juniper_ssg"),
            ("paloalto.pan-os.8.1", "paloalto_panos"),
        ];
        for (identity, expected) in cases {
            let profile = registry.resolve(identity).expect(identity);
            assert_eq!(profile.name(), expected, "{identity}");
        }
        assert!(registry.resolve("acme.box.1").is_err());
    }

    #[test]
    fn vendor_prompts_match_real_lines() {
        let ios = cisco_ios().expect("ios");
        assert!(matches(&ios, LOGIN, "Router>"));
        assert!(matches(&ios, LOGIN_ENABLE, "Router#"));
        assert!(!matches(&ios, LOGIN, "Router#"));
        assert!(matches(&ios, "configure_terminal", "Router(config)#"));

        let asa = cisco_asa().expect("asa");
        assert!(matches(&asa, LOGIN_OR_ENABLE, "ciscoasa> "));
        assert!(matches(&asa, LOGIN_OR_ENABLE, "ciscoasa# "));
        assert!(!matches(&asa, LOGIN, "ciscoasa# "));

        let srx = juniper_srx().expect("srx");
        assert!(matches(&srx, LOGIN, "root@srx-1> "));
        assert!(matches(&srx, "configure_private", "root@srx-1# "));

        let panos = paloalto_panos().expect("panos");
        assert!(matches(&panos, LOGIN, "admin@PA-VM> "));
        assert!(matches(&panos, "configure", "admin@PA-VM# "));

        let hillstone = hillstone().expect("hillstone");
        assert!(matches(&hillstone, LOGIN, "SG-6000# "));
        assert!(matches(&hillstone, "configure", "SG-6000(config)# "));

        let huawei = huawei_usg().expect("huawei");
        assert!(matches(&huawei, LOGIN, "<USG6000V1>"));
        assert!(matches(&huawei, "system_View", "[USG6000V1]"));

        let forti = fortigate().expect("fortigate");
        assert!(matches(&forti, LOGIN, "FGT-VM # "));
        assert!(!matches(&forti, LOGIN, "FGT-VM (console) # "));
    }

    #[test]
    fn fortigate_vdom_request_gets_context_mode() {
        let forti = fortigate().expect("fortigate");
        let request = CliRequest {
            mode: "root".to_string(),
            ..Default::default()
        };
        let overlay = forti.request_modes(&request).expect("overlay");
        let prompts = overlay.prompts_for("root").expect("vdom prompt");
        assert!(first_match(prompts, "FGT-VM (root) # ").is_some());

        let steps = forti.normalize_steps(&request);
        let commands: Vec<&str> = steps.iter().map(|s| s.command.as_str()).collect();
        assert_eq!(
            commands,
            vec![
                "config global",
                "config system console\n\tset output standard\nend",
                "end"
            ]
        );

        // `global` is declared, so it is not treated as a VDOM name.
        let global = CliRequest {
            mode: "global".to_string(),
            ..Default::default()
        };
        assert!(forti.request_modes(&global).expect("overlay").is_empty());
    }

    #[test]
    fn panos_sets_format_before_pager() {
        let panos = paloalto_panos().expect("panos");
        let request = CliRequest {
            format: Some("set".to_string()),
            ..Default::default()
        };
        let commands: Vec<String> = panos
            .normalize_steps(&request)
            .into_iter()
            .map(|s| s.command)
            .collect();
        assert_eq!(
            commands,
            vec!["set cli config-output-format set", "set cli pager off"]
        );
    }

    #[test]
    fn template_catalog_has_metadata_for_all_builtin_templates() {
        let catalog = template_catalog();
        assert_eq!(catalog.len(), BUILTIN_TEMPLATES.len());
        let meta = template_metadata("PaloAlto_PanOS").expect("metadata should resolve");
        assert!(meta.capabilities.contains(&TemplateCapability::OutputFormat));
    }

    #[test]
    fn diagnose_all_templates_json_includes_builtin_template_keys() {
        let json = diagnose_all_templates_json().expect("all diagnostics json");
        let value: serde_json::Value = serde_json::from_str(&json).expect("parse json");
        for name in BUILTIN_TEMPLATES {
            assert!(value.get(*name).is_some(), "missing template key: {name}");
        }
        let single = diagnose_template_json("cisco_ios").expect("json diagnostics");
        let report: ProfileDiagnostics = serde_json::from_str(&single).expect("parse report");
        assert_eq!(report.total_modes, 4);
    }
}
