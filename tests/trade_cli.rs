use anyhow::Result;
use assert_cmd::Command;
use predicates::prelude::*;

fn cli() -> Result<Command> {
    let mut cmd = Command::cargo_bin("trade_cli")?;
    cmd.env("RUST_LOG", "off");
    Ok(cmd)
}

#[test]
fn validate_edit_accepts_fixed_price_change() -> Result<()> {
    cli()?
        .args([
            "validate-edit",
            "--offer-id",
            "offer-cli",
            "--offer-market-based",
            "--offer-margin-pct",
            "-1.5",
            "--edit-type",
            "fixed-price-only",
            "--price",
            "29500.75",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"accepted\": true"))
        .stdout(predicate::str::contains("29500.75"))
        .stdout(predicate::str::contains("\"use_market_based_price\": false"));
    Ok(())
}

#[test]
fn validate_edit_accepts_activation_only_with_sentinels() -> Result<()> {
    cli()?
        .args([
            "validate-edit",
            "--edit-type",
            "activation-state-only",
            "--enable",
            "false",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"state\": \"deactivated\""));
    Ok(())
}

#[test]
fn validate_edit_rejects_price_in_activation_only_edit() -> Result<()> {
    cli()?
        .args([
            "validate-edit",
            "--offer-id",
            "offer-cli",
            "--offer-price",
            "30000",
            "--edit-type",
            "activation-state-only",
            "--price",
            "5",
            "--enable",
            "true",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("offer-cli"));
    Ok(())
}

#[test]
fn validate_edit_rejects_negative_trigger_price() -> Result<()> {
    cli()?
        .args([
            "validate-edit",
            "--offer-market-based",
            "--edit-type",
            "trigger-price-only",
            "--use-market-based-price",
            "--trigger-price",
            "-1",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("negative"));
    Ok(())
}

#[test]
fn validate_edit_rejects_unknown_edit_type() -> Result<()> {
    cli()?
        .args(["validate-edit", "--edit-type", "price-and-everything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown edit type"));
    Ok(())
}
