//! Fluent construction of content manifests
//!
//! Manifest factories (one per discoverer/deliverer pairing) assemble
//! manifests incrementally; the builder keeps that assembly readable and
//! funnels every construction through [`ContentManifest::validate`] so an
//! invalid manifest can never enter the pipeline.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::manifest::id::ManifestId;
use crate::manifest::model::{
    ContentDependency, ContentManifest, ContentMetadata, ContentReference, ContentType, GameType,
    InstallBehavior, InstallStep, InstallTarget, InstallationInstructions, ManifestFile,
    ManifestFileSourceType, PublisherInfo, WorkspaceStrategy, normalize_relative_path,
};

/// Builder for [`ContentManifest`]
pub struct ContentManifestBuilder {
    manifest: ContentManifest,
}

impl ContentManifestBuilder {
    /// Start a manifest with the identity fields every manifest needs
    pub fn new<N, V>(id: ManifestId, name: N, version: V) -> Self
    where
        N: Into<String>,
        V: Into<String>,
    {
        Self {
            manifest: ContentManifest {
                id,
                name: name.into(),
                version: version.into(),
                manifest_version: 1,
                content_type: ContentType::UnknownContentType,
                target_game: GameType::ZeroHour,
                publisher: PublisherInfo::default(),
                metadata: ContentMetadata::default(),
                dependencies: Vec::new(),
                files: Vec::new(),
                installation: InstallationInstructions::default(),
                required_directories: Vec::new(),
                content_references: Vec::new(),
                known_addons: Vec::new(),
            },
        }
    }

    pub fn content_type(mut self, content_type: ContentType) -> Self {
        self.manifest.content_type = content_type;
        self
    }

    pub fn target_game(mut self, target_game: GameType) -> Self {
        self.manifest.target_game = target_game;
        self
    }

    pub fn manifest_version(mut self, version: u32) -> Self {
        self.manifest.manifest_version = version;
        self
    }

    pub fn publisher(mut self, publisher: PublisherInfo) -> Self {
        self.manifest.publisher = publisher;
        self
    }

    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.manifest.metadata.description = description.into();
        self
    }

    pub fn tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.manifest.metadata.tags.push(tag.into());
        self
    }

    pub fn icon_url<S: Into<String>>(mut self, url: S) -> Self {
        self.manifest.metadata.icon_url = Some(url.into());
        self
    }

    pub fn release_date(mut self, date: DateTime<Utc>) -> Self {
        self.manifest.metadata.release_date = Some(date);
        self
    }

    pub fn workspace_strategy(mut self, strategy: WorkspaceStrategy) -> Self {
        self.manifest.installation.workspace_strategy = strategy;
        self
    }

    pub fn pre_install_step(mut self, step: InstallStep) -> Self {
        self.manifest.installation.pre_install_steps.push(step);
        self
    }

    pub fn post_install_step(mut self, step: InstallStep) -> Self {
        self.manifest.installation.post_install_steps.push(step);
        self
    }

    /// Declare a dependency on other content
    pub fn dependency<S: Into<String>>(
        mut self,
        id: S,
        dependency_type: ContentType,
        install_behavior: InstallBehavior,
    ) -> Self {
        self.manifest.dependencies.push(ContentDependency {
            id: id.into(),
            dependency_type,
            install_behavior,
        });
        self
    }

    pub fn required_directory<S: Into<String>>(mut self, path: S) -> Self {
        self.manifest.required_directories.push(path.into());
        self
    }

    pub fn content_reference<S: Into<String>>(mut self, id: S, content_type: ContentType) -> Self {
        self.manifest.content_references.push(ContentReference {
            id: id.into(),
            content_type,
        });
        self
    }

    pub fn known_addon<S: Into<String>>(mut self, id: S) -> Self {
        self.manifest.known_addons.push(id.into());
        self
    }

    /// Add a pre-built file entry
    pub fn file(mut self, file: ManifestFile) -> Self {
        self.manifest.files.push(file);
        self
    }

    /// Add a file that still lives in a delivered package
    ///
    /// The pool rewrites such entries to ContentAddressable when the
    /// manifest is added together with its source directory.
    pub fn extracted_file<P: AsRef<str>>(mut self, relative_path: P, size: u64) -> Result<Self> {
        let relative_path = normalize_relative_path(relative_path.as_ref())?;
        self.manifest.files.push(ManifestFile {
            relative_path,
            size,
            hash: None,
            source_type: ManifestFileSourceType::ExtractedPackage,
            is_executable: false,
            install_target: InstallTarget::Workspace,
            download_url: None,
            source_path: None,
        });
        Ok(self)
    }

    /// Add a file already stored in the CAS
    pub fn content_addressable_file<P, H>(
        mut self,
        relative_path: P,
        size: u64,
        hash: H,
    ) -> Result<Self>
    where
        P: AsRef<str>,
        H: Into<String>,
    {
        let relative_path = normalize_relative_path(relative_path.as_ref())?;
        self.manifest.files.push(ManifestFile {
            relative_path,
            size,
            hash: Some(hash.into()),
            source_type: ManifestFileSourceType::ContentAddressable,
            is_executable: false,
            install_target: InstallTarget::Workspace,
            download_url: None,
            source_path: None,
        });
        Ok(self)
    }

    /// Finish construction, enforcing the manifest invariants
    pub fn build(self) -> Result<ContentManifest> {
        self.manifest.validate()?;
        Ok(self.manifest)
    }
}
