//! Operator commands. They act on the key store only; keys already
//! loaded into a PED are removed over the host protocol.

use anyhow::{Context, Result};
use pedkit_ceremony::{CeremonyError, CeremonySession};
use pedkit_core::config::CeremonyConfig;
use pedkit_core::KeyAlgorithm;
use pedkit_store::{DeletionCheck, KekRole, KeyRecord};
use std::time::Duration;
use zeroize::Zeroizing;

use crate::services::{self, Services};

// ── `pedkitd keys` ────────────────────────────────────────────────────────────

pub fn cmd_keys_list(services: &Services, json: bool) -> Result<()> {
    let mut records = services.store.list_all()?;
    records.sort_by_key(|r| (r.slot.unwrap_or(u32::MAX), r.created_at));

    if json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }
    if records.is_empty() {
        println!("no keys recorded");
        return Ok(());
    }
    println!(
        "{:<8} {:<6} {:<14} {:<10} {:<11} {:<10} {:<8} label",
        "kcv", "slot", "type", "algorithm", "status", "role", "material"
    );
    for r in &records {
        println!("{}", format_record(r));
    }
    Ok(())
}

pub fn cmd_keys_check(services: &Services, kcv: &str) -> Result<()> {
    let check = services
        .store
        .validate_deletion(kcv)
        .with_context(|| format!("checking key {kcv}"))?;
    println!("{}", describe_check(kcv, &check));
    Ok(())
}

pub fn cmd_keys_delete(services: &Services, kcv: &str) -> Result<()> {
    let removed = services
        .store
        .delete(kcv)
        .with_context(|| format!("deleting key {kcv}"))?;
    println!(
        "deleted {} ({} at slot {})",
        removed.kcv,
        removed.key_type,
        slot_text(removed.slot)
    );
    Ok(())
}

pub fn cmd_keys_check_all(services: &Services) -> Result<()> {
    let report = services.store.validate_all_deletions()?;
    println!(
        "{} keys, {} deletable, {} blocked",
        report.total,
        report.deletable,
        report.blocked.len()
    );
    for blocked in &report.blocked {
        let profiles = if blocked.profiles.is_empty() {
            String::new()
        } else {
            format!(" (profiles: {})", blocked.profiles.join(", "))
        };
        println!(
            "  {} slot {} {}: {}{}",
            blocked.kcv,
            slot_text(blocked.slot),
            blocked.key_type,
            blocked.reason,
            profiles
        );
    }
    Ok(())
}

// ── `pedkitd kek` ─────────────────────────────────────────────────────────────

pub fn cmd_kek_status(services: &Services, json: bool) -> Result<()> {
    let status = services.kek.status()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }
    println!(
        "keychain:      {}",
        if status.element_available { "available" } else { "unavailable" }
    );
    match &status.active {
        Some(record) => println!(
            "active KEK:    {} ({}, created {})",
            record.kcv, record.algorithm, record.created_at
        ),
        None => println!("active KEK:    none"),
    }
    if status.pointer.as_deref() != status.active.as_ref().map(|r| r.kcv.as_str()) {
        println!(
            "warning:       keychain points at {}",
            status.pointer.as_deref().unwrap_or("nothing")
        );
    }
    println!(
        "sealing:       {}",
        if status.wraps { "on" } else { "off (needs an AES-256 KEK)" }
    );
    println!(
        "material:      {} sealed, {} plain",
        status.sealed_records, status.plain_records
    );
    Ok(())
}

pub fn cmd_kek_generate(services: &Services, length: usize) -> Result<()> {
    let record = services.kek.generate(length).context("generating KEK")?;
    println!("new KEK active: {} ({})", record.kcv, record.algorithm);
    // material written before this KEK existed is still plain
    services::migrate(&services.store)
}

pub fn cmd_kek_rotate(services: &Services, length: usize) -> Result<()> {
    let previous = services.store.current_kek()?.map(|r| r.kcv);
    let record = services.kek.rotate(length).context("rotating KEK")?;
    println!(
        "KEK rotated: {} -> {} ({})",
        previous.as_deref().unwrap_or("none"),
        record.kcv,
        record.algorithm
    );
    Ok(())
}

// ── `pedkitd ceremony` ────────────────────────────────────────────────────────

pub fn cmd_ceremony(
    services: &Services,
    config: &CeremonyConfig,
    custodians: u8,
    algorithm: KeyAlgorithm,
    kek: bool,
    label: Option<&str>,
) -> Result<()> {
    let role = if kek { KekRole::Storage } else { KekRole::None };
    let mut session = CeremonySession::new(services.store.clone(), services.kek.clone())
        .with_component_timeout(Duration::from_secs(config.component_timeout_secs));
    session.start(custodians, algorithm, role)?;
    let status = session.status();
    println!(
        "key ceremony: {} custodians, {}{}",
        custodians,
        status.algorithm.unwrap_or(algorithm),
        if kek { ", storage KEK" } else { "" }
    );

    let mut custodian = 1;
    while custodian <= custodians {
        let prompt = format!("custodian {custodian}/{custodians}, enter component (hex): ");
        let component = Zeroizing::new(rpassword::prompt_password(prompt)?);
        match session.add_component(&component) {
            Ok(receipt) => {
                println!("custodian {} component KCV: {}", receipt.custodian, receipt.kcv);
                custodian += 1;
            }
            Err(e @ (CeremonyError::InvalidHex(_) | CeremonyError::WrongLength { .. })) => {
                println!("rejected: {e}; try again");
            }
            Err(e) => return Err(e).context("key ceremony aborted"),
        }
    }

    let outcome = session.finalize(label)?;
    println!("key assembled: KCV {} (record {})", outcome.kcv, outcome.record_id);
    Ok(())
}

// ── `pedkitd migrate` ─────────────────────────────────────────────────────────

pub fn cmd_migrate(services: &Services) -> Result<()> {
    if !services.kek.has_active_kek()? {
        println!("no active KEK: generate one or run a KEK ceremony first");
        return Ok(());
    }
    services::migrate(&services.store)?;
    let status = services.kek.status()?;
    println!(
        "material: {} sealed, {} plain",
        status.sealed_records, status.plain_records
    );
    Ok(())
}

// ── Formatting ────────────────────────────────────────────────────────────────

fn slot_text(slot: Option<u32>) -> String {
    slot.map_or_else(|| "-".to_string(), |s| s.to_string())
}

fn format_record(r: &KeyRecord) -> String {
    let role = match r.kek_role {
        KekRole::None => "-",
        KekRole::Storage => "KEK",
        KekRole::Transport => "KTK",
    };
    let material = match &r.material {
        Some(m) if m.is_sealed() => "sealed",
        Some(_) => "plain",
        None => "-",
    };
    format!(
        "{:<8} {:<6} {:<14} {:<10} {:<11} {:<10} {:<8} {}",
        r.kcv,
        slot_text(r.slot),
        r.key_type.to_string(),
        r.algorithm.to_string(),
        r.status.to_string(),
        role,
        material,
        r.label.as_deref().unwrap_or("")
    )
}

fn describe_check(kcv: &str, check: &DeletionCheck) -> String {
    if check.can_delete {
        return format!("{kcv}: can be deleted");
    }
    let mut reasons = Vec::new();
    if !check.profiles.is_empty() {
        reasons.push(format!("used by profiles {}", check.profiles.join(", ")));
    }
    if check.is_active_kek {
        reasons.push("active KEK".to_string());
    }
    if check.is_active_ktk {
        reasons.push("active KTK".to_string());
    }
    format!("{kcv}: blocked ({})", reasons.join("; "))
}
