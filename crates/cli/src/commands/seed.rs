use serde_json::json;
use shopkeep_db::fixtures::{DemoSeedDataset, SeedResult};

use crate::commands::{with_migrated_pool, CommandResult};

pub fn run() -> CommandResult {
    let result = with_migrated_pool("seed", |_, pool| async move {
        let seeded = DemoSeedDataset::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DemoSeedDataset::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        if !verification.all_present {
            let failed: Vec<&str> = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(check.as_str()))
                .collect();
            return Err(("seed_verification", verification_message(&failed), 6u8));
        }
        Ok(seeded)
    });

    match result {
        Ok((_, seeded)) => CommandResult::success_with_data("seed", summary(&seeded), Some(json!({
            "tenant_id": seeded.tenant_id,
            "inventory_rows": seeded.inventory_rows,
            "customers": seeded.customers,
            "orders": seeded.orders,
        }))),
        Err(failure) => failure,
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "demo shop loaded for `{}`: {} inventory rows, {} customers, {} orders",
        seeded.tenant_id, seeded.inventory_rows, seeded.customers, seeded.orders
    )
}

fn verification_message(failed_checks: &[&str]) -> String {
    if failed_checks.is_empty() {
        "Some seed data failed to load".to_string()
    } else {
        format!("Seed verification failed for checks: {}", failed_checks.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::verification_message;

    #[test]
    fn verification_message_names_failed_checks() {
        assert_eq!(
            verification_message(&["inventory", "orders"]),
            "Seed verification failed for checks: inventory, orders"
        );
        assert_eq!(verification_message(&[]), "Some seed data failed to load");
    }
}
