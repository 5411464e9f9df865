use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PathParams {
    #[schemars(description = "Audio file path relative to the music root")]
    pub path: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SetMetadataParams {
    #[schemars(description = "Audio file path relative to the music root")]
    pub path: String,
    #[schemars(
        description = "Fields to set, e.g. {\"title\": \"...\", \"genre\": \"House\"}. An empty or blank value clears the field."
    )]
    pub fields: Option<BTreeMap<String, String>>,
    #[schemars(
        description = "Image to embed as front cover, relative to the music root"
    )]
    pub image_path: Option<String>,
    #[schemars(description = "Remove all embedded album art (default false)")]
    pub remove_art: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FieldParams {
    #[schemars(description = "Audio file path relative to the music root")]
    pub path: String,
    #[schemars(description = "Field name, e.g. 'genre' or 'TCON'")]
    pub field: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct CreateFieldParams {
    #[schemars(description = "Audio file path relative to the music root")]
    pub path: String,
    #[schemars(description = "Field name (letters, digits, underscore, space; max 50 chars)")]
    pub field: String,
    #[schemars(description = "Initial value (default empty)")]
    pub value: Option<String>,
    #[schemars(
        description = "Create the field on every audio file in the same folder (default false)"
    )]
    pub apply_to_folder: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FolderFieldValueParams {
    #[schemars(description = "Folder path relative to the music root")]
    pub folder: String,
    #[schemars(description = "Field name")]
    pub field: String,
    #[schemars(description = "Value written to every file; blank clears the field")]
    pub value: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FolderFieldParams {
    #[schemars(description = "Folder path relative to the music root")]
    pub folder: String,
    #[schemars(description = "Field name")]
    pub field: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FolderArtParams {
    #[schemars(description = "Folder path relative to the music root")]
    pub folder: String,
    #[schemars(description = "Image to embed, relative to the music root")]
    pub image_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenameParams {
    #[schemars(description = "File or folder path relative to the music root")]
    pub path: String,
    #[schemars(description = "New name (no path separators). Files keep their extension when omitted.")]
    pub new_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MoveFolderParams {
    #[schemars(description = "Folder to move, relative to the music root")]
    pub path: String,
    #[schemars(
        description = "Destination parent folder relative to the music root ('' for the root itself)"
    )]
    pub destination: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CreateFolderParams {
    #[schemars(description = "Parent folder relative to the music root ('' for the root itself)")]
    pub parent: String,
    #[schemars(description = "Name of the new folder (no path separators, no leading dot)")]
    pub name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct DeleteFolderParams {
    #[schemars(description = "Folder to delete, relative to the music root")]
    pub path: String,
    #[schemars(description = "Delete the folder even when it is not empty (default false)")]
    pub force: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListFolderParams {
    #[schemars(description = "Folder relative to the music root ('' for the root itself)")]
    pub path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ActionIdParams {
    #[schemars(description = "History action id from list_history")]
    pub action_id: String,
}
