use std::path::PathBuf;

use rdp_core::Animal;
use rdp_profiler::{ConfigError, OrganizationConfigLoader, PromptBuilder};

fn workspace_root() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../..")
}

#[test]
fn shipped_organizations_have_loadable_templates() {
    let loader = OrganizationConfigLoader::from_workspace_root(workspace_root()).unwrap();
    let prompts = PromptBuilder::default();

    let mut enabled = 0;
    for org in loader.all().filter(|org| org.enabled) {
        let template = prompts.template(loader.prompt_path(org.id).unwrap()).unwrap();
        assert!(!template.version.is_empty(), "org {} has no version", org.id);
        enabled += 1;
    }
    assert!(enabled >= 2);
    assert!(matches!(loader.get(31), Err(ConfigError::DisabledOrganization(31))));
}

#[test]
fn demo_animals_render_against_their_organization() {
    let root = workspace_root();
    let loader = OrganizationConfigLoader::from_workspace_root(&root).unwrap();
    let prompts = PromptBuilder::default();
    let animals: Vec<Animal> =
        serde_json::from_str(&std::fs::read_to_string(root.join("demos/animals.json")).unwrap())
            .unwrap();

    let bruno = animals.iter().find(|a| a.name == "Bruno").unwrap();
    let org = loader.get(bruno.organization_id).unwrap();
    let template = prompts.template(loader.prompt_path(org.id).unwrap()).unwrap();
    let messages = template.build_messages(bruno, org);

    assert!(messages[0].content.contains("Listings arrive in de"));
    let user = &messages[1].content;
    assert!(user.contains("Name: Bruno"));
    assert!(user.contains("Breed: German Shepherd Mix"));
    assert!(user.contains("location: Rumänien"));
    assert!(user.contains(r#"{"energy_level": "medium", "confidence_scores": {"energy_level": 0.8}}"#));
    assert_eq!(prompts.cached_len(), 1);
}
