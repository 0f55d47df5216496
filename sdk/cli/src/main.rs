use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

#[derive(Parser, Debug)]
#[command(name = "pledge-cli")]
#[command(about = "Pledge dev CLI for driving bets against the API", long_about = None)]
struct Cli {
    /// API base URL (e.g., http://localhost:8080)
    #[arg(long, env = "PLEDGE_API", default_value = "http://localhost:8080")]
    api: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a user with the starting balance
    Register {
        #[arg(long)]
        id: String,
        #[arg(long, default_value = "")]
        name: String,
    },
    /// Mark a user as departed
    Leave {
        #[arg(long)]
        id: String,
    },
    /// Show stats and tier for a user
    Profile {
        #[arg(long)]
        id: String,
    },
    /// List a user's open bets
    Bets {
        #[arg(long)]
        id: String,
    },
    /// List disputes and deferred proofs waiting on a user
    Pending {
        #[arg(long)]
        id: String,
    },
    /// Propose a bet to one user (--with) or a group (--group + --member)
    Propose {
        #[arg(long)]
        initiator: String,
        #[arg(long, conflicts_with = "group")]
        with: Option<String>,
        #[arg(long)]
        group: Option<String>,
        #[arg(long = "member")]
        members: Vec<String>,
        #[arg(long)]
        activity: String,
        #[arg(long)]
        stake: u64,
        /// live_photo | location_checkin | screenshot
        #[arg(long, default_value = "live_photo")]
        proof: String,
        /// daily | three_x_week | one_x_week | two_x_month | one_x_month
        #[arg(long, default_value = "daily")]
        frequency: String,
        /// one_week | two_weeks | one_month | three_months | six_months
        #[arg(long, default_value = "one_month")]
        length: String,
    },
    Accept {
        #[arg(long)]
        bet: Uuid,
        #[arg(long)]
        user: String,
    },
    Reject {
        #[arg(long)]
        bet: Uuid,
        #[arg(long)]
        user: String,
    },
    /// Submit proof evidence and wait for the verdict
    Prove {
        #[arg(long)]
        bet: Uuid,
        #[arg(long)]
        user: String,
        #[arg(long)]
        evidence: String,
    },
    /// Accept or reject a disputed or deferred proof
    Resolve {
        #[arg(long)]
        bet: Uuid,
        #[arg(long)]
        user: String,
        /// accept | reject
        #[arg(long)]
        resolution: String,
    },
    Settle {
        #[arg(long)]
        bet: Uuid,
    },
    /// Abandon an in-flight or deferred verification
    CancelVerification {
        #[arg(long)]
        id: Uuid,
    },
    Show {
        #[arg(long)]
        bet: Uuid,
    },
    Leaderboard {
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Ask for activity ideas
    Suggest {
        #[arg(long, default_value = "")]
        preferences: String,
    },
}

fn counterparty(
    with: Option<String>,
    group: Option<String>,
    members: Vec<String>,
) -> anyhow::Result<Value> {
    match (with, group) {
        (Some(user), None) => Ok(json!({ "kind": "individual", "user": user })),
        (None, Some(name)) if !members.is_empty() => {
            Ok(json!({ "kind": "group", "name": name, "members": members }))
        }
        (None, Some(_)) => bail!("--group needs at least one --member"),
        _ => bail!("pass either --with or --group"),
    }
}

fn request(client: &Client, base: &str, command: Commands) -> anyhow::Result<RequestBuilder> {
    let url = |path: String| format!("{base}{path}");
    let req = match command {
        Commands::Register { id, name } => client
            .post(url("/v1/users".into()))
            .json(&json!({ "id": id, "display_name": name })),
        Commands::Leave { id } => client.delete(url(format!("/v1/users/{id}"))),
        Commands::Profile { id } => client.get(url(format!("/v1/users/{id}/profile"))),
        Commands::Bets { id } => client.get(url(format!("/v1/users/{id}/bets"))),
        Commands::Pending { id } => client.get(url(format!("/v1/users/{id}/pending"))),
        Commands::Propose {
            initiator,
            with,
            group,
            members,
            activity,
            stake,
            proof,
            frequency,
            length,
        } => client.post(url("/v1/bets".into())).json(&json!({
            "initiator": initiator,
            "counterparty": counterparty(with, group, members)?,
            "activity": activity,
            "stake": stake,
            "proof_type": proof,
            "frequency": frequency,
            "length": length,
        })),
        Commands::Accept { bet, user } => client
            .post(url(format!("/v1/bets/{bet}/accept")))
            .json(&json!({ "user": user })),
        Commands::Reject { bet, user } => client
            .post(url(format!("/v1/bets/{bet}/reject")))
            .json(&json!({ "user": user })),
        Commands::Prove {
            bet,
            user,
            evidence,
        } => client
            .post(url(format!("/v1/bets/{bet}/proofs")))
            .json(&json!({ "submitter": user, "evidence_uri": evidence })),
        Commands::Resolve {
            bet,
            user,
            resolution,
        } => client
            .post(url(format!("/v1/bets/{bet}/resolve")))
            .json(&json!({ "resolver": user, "resolution": resolution })),
        Commands::Settle { bet } => client.post(url(format!("/v1/bets/{bet}/settle"))),
        Commands::CancelVerification { id } => {
            client.delete(url(format!("/v1/verifications/{id}")))
        }
        Commands::Show { bet } => client.get(url(format!("/v1/bets/{bet}"))),
        Commands::Leaderboard { limit } => {
            client.get(url(format!("/v1/leaderboard?limit={limit}")))
        }
        Commands::Suggest { preferences } => client
            .post(url("/v1/suggestions".into()))
            .json(&json!({ "preferences": preferences })),
    };
    Ok(req)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("building http client")?;
    let base = cli.api.trim_end_matches('/').to_string();

    let res = request(&client, &base, cli.command)?
        .send()
        .with_context(|| format!("calling {base}"))?;
    println!("status: {}", res.status());
    let text = res.text().unwrap_or_default();
    if !text.is_empty() {
        match serde_json::from_str::<Value>(&text) {
            Ok(body) => println!("{}", serde_json::to_string_pretty(&body)?),
            Err(_) => println!("{text}"),
        }
    }
    Ok(())
}
