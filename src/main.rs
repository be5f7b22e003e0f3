use anyhow::Context;
use serde_json::{Value, json};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use workitem_agent::cli::{Args, Commands, ServiceCommand};
use workitem_agent::{
    AgentError, Audience, ConfigurationManager, CreateWorkItemRequest, UpdateWorkItemRequest,
    WorkItemAgent,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize logging; stdout is reserved for command output
    let default_filter = if args.verbose {
        "workitem_agent=debug"
    } else {
        "workitem_agent=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let manager = match &args.config {
        Some(path) => ConfigurationManager::with_file(path),
        None => ConfigurationManager::new(),
    };
    let config = manager.load().context("failed to load configuration")?;

    let command = match args.command {
        Commands::ShowConfig => return print_json(&ConfigurationManager::masked_view(&config)),
        Commands::Service(command) => command,
    };

    let audience = Audience::from(args.audience);
    let agent = match WorkItemAgent::new(config) {
        Ok(agent) => agent,
        Err(e) => fail(&e, audience),
    };

    if let Some(path) = &args.state_file
        && agent.load_state(path)?
    {
        info!("Restored circuit breaker state from {:?}", path);
    }

    let result = run_command(&agent, command).await;

    if let Some(path) = &args.state_file {
        agent
            .save_state(path)
            .with_context(|| format!("failed to save state to {:?}", path))?;
    }

    match result {
        Ok(output) => print_json(&output),
        Err(e) => fail(&e, audience),
    }
}

async fn run_command(agent: &WorkItemAgent, command: ServiceCommand) -> Result<Value, AgentError> {
    let service = agent.work_items();
    let output = match command {
        ServiceCommand::Check => json!(agent.auth().validate_authentication().await?),
        ServiceCommand::Status => json!(agent.status().await),
        ServiceCommand::Get { ids } => match ids.as_slice() {
            [id] => json!(service.get_work_item(*id).await?),
            _ => json!(service.get_work_items(&ids).await?),
        },
        ServiceCommand::Create {
            work_item_type,
            title,
            fields,
            project,
        } => {
            let mut request = CreateWorkItemRequest::new(work_item_type).with_title(title);
            for (name, value) in fields {
                request = request.with_field(name, value);
            }
            if let Some(project) = project {
                request = request.in_project(project);
            }
            json!(service.create_work_item(request).await?)
        }
        ServiceCommand::Update {
            id,
            state,
            title,
            fields,
        } => {
            let mut request = UpdateWorkItemRequest::new(id);
            if let Some(state) = state {
                request = request.set_state(state);
            }
            if let Some(title) = title {
                request = request.set_title(title);
            }
            for (name, value) in fields {
                request = request.set_field(&name, value);
            }
            json!(service.update_work_item(request).await?)
        }
        ServiceCommand::Delete { id } => {
            service.delete_work_item(id).await?;
            json!({ "deleted": id })
        }
        ServiceCommand::Query { wiql } => json!(service.query_work_items(&wiql).await?),
    };
    Ok(output)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn fail(error: &AgentError, audience: Audience) -> ! {
    error!(code = error.code(), "Command failed");
    let message = workitem_agent::recovery::UserMessageGenerator::generate_user_message(error, audience);
    eprintln!("Error: {}", message);
    std::process::exit(1);
}
