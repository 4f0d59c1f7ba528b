use crate::commands::{prepare, CommandResult};
use signoff_db::{connect_with_config, migrations, DirectorySeed, SeedResult};

pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("seed") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;

        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let seeded = DirectorySeed::load(&pool)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 5u8))?;

        let verification = DirectorySeed::verify(&pool)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;

        let run_result = if verification.all_present {
            Ok(seeded)
        } else {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>();
            Err(("seed_verification", verification_failure_message(&failed), 6u8))
        };

        pool.close().await;
        run_result
    });

    match result {
        Ok(seeded) => CommandResult::success("seed", summary(&seeded)),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}

fn summary(seeded: &SeedResult) -> String {
    format!(
        "directory fixture loaded: {} members, {} projects, {} stages",
        seeded.members, seeded.projects, seeded.stages
    )
}

fn verification_failure_message(failed: &[&str]) -> String {
    if failed.is_empty() {
        "some directory rows failed to load".to_string()
    } else {
        format!("seed verification failed for: {}", failed.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use signoff_db::SeedResult;

    use super::{summary, verification_failure_message};

    #[test]
    fn failure_message_names_missing_rows() {
        assert_eq!(
            verification_failure_message(&["mem-admin", "stage-release"]),
            "seed verification failed for: mem-admin, stage-release"
        );
        assert_eq!(verification_failure_message(&[]), "some directory rows failed to load");
    }

    #[test]
    fn summary_counts_each_table() {
        let text = summary(&SeedResult { members: 6, projects: 2, stages: 3 });
        assert_eq!(text, "directory fixture loaded: 6 members, 2 projects, 3 stages");
    }
}
