//! The game UI as a directed graph of screens.
//!
//! Screens live in an arena owned by [`ScreenGraph`]; transitions refer to
//! their target by [`ScreenId`] and are resolved through the arena when a path
//! is walked.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{PilotError, PilotResult};
use crate::perception::types::Rect;

macro_rules! screen_ids {
    ($($name:ident),+ $(,)?) => {
        /// Stable key of a screen.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub enum ScreenId {
            $($name),+
        }

        impl ScreenId {
            pub const ALL: &'static [ScreenId] = &[$(ScreenId::$name),+];
        }
    };
}

screen_ids!(
    Unknown,
    Bastion,
    BastionKeys,
    ClassicArena,
    ClassicArenaPreparing,
    ClassicArenaDefeat,
    ClassicArenaDefeatResult,
    ClassicArenaVin,
    ClassicArenaVinResult,
    ClassicArenaFight,
    ClassicArenaFreeTokens,
    ClassicArenaBuyTokens,
    ClassicArenaBayTokens,
    Dungeons,
    DungeonStages,
    DungeonPreparing,
    DungeonVictory,
    DungeonDefeat,
    DungeonBuyKeys,
    NeedUpgradeGame,
    ConnectionIssue,
    TechWork,
);

impl fmt::Display for ScreenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl FromStr for ScreenId {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ScreenId::ALL
            .iter()
            .copied()
            .find(|id| id.to_string().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PilotError::InvalidInput(format!("unknown screen id '{s}'")))
    }
}

/// A named, visually locatable region of a screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    #[serde(alias = "Name")]
    pub name: String,
    /// Key into the template store. Empty for keyboard-only elements.
    #[serde(default, alias = "ImageTemplatePath")]
    pub template: String,
    /// Search rectangle; absent or zero-sized means the whole frame.
    #[serde(default, alias = "Area")]
    pub area: Option<Rect>,
    /// Keyboard shortcut pressed instead of clicking.
    #[serde(default, alias = "Key")]
    pub key: Option<String>,
    #[serde(default, alias = "Threshold")]
    pub threshold: Option<f32>,
}

impl UiElement {
    pub fn search_area(&self) -> Option<Rect> {
        self.area.filter(|a| !a.is_empty())
    }

    pub fn has_template(&self) -> bool {
        !self.template.trim().is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    #[serde(alias = "TargetScreenId")]
    pub target: ScreenId,
    #[serde(alias = "TriggerElement")]
    pub trigger: UiElement,
    /// Search the trigger across the full frame width inside the vertical
    /// band of its area.
    #[serde(default, alias = "HorizontalSearch")]
    pub horizontal_search: bool,
}

/// One screen record as written in the screen definition files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Screen {
    #[serde(alias = "Id")]
    pub id: ScreenId,
    /// Informational grouping only.
    #[serde(default, alias = "ParentId")]
    pub parent: Option<ScreenId>,
    #[serde(default, alias = "VerificationImages")]
    pub verification: Vec<UiElement>,
    #[serde(default, alias = "UIElements")]
    pub elements: Vec<UiElement>,
    #[serde(default, alias = "Transitions")]
    pub transitions: Vec<Transition>,
}

impl Screen {
    /// Looks up an interactive element or verification image by name,
    /// ignoring case.
    pub fn element(&self, name: &str) -> Option<&UiElement> {
        self.elements
            .iter()
            .chain(self.verification.iter())
            .find(|e| e.name.eq_ignore_ascii_case(name))
    }

    pub fn require_element(&self, name: &str) -> PilotResult<&UiElement> {
        self.element(name).ok_or_else(|| PilotError::UnknownElement {
            screen: self.id,
            element: name.to_string(),
        })
    }

    pub fn is_identifiable(&self) -> bool {
        !self.verification.is_empty()
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScreenFile {
    Many(Vec<Screen>),
    One(Box<Screen>),
}

/// Read-only arena of screens, in configuration order.
#[derive(Debug, Clone)]
pub struct ScreenGraph {
    screens: Vec<Screen>,
    index: HashMap<ScreenId, usize>,
}

impl ScreenGraph {
    /// Validates and indexes the screens. Fails on duplicate ids, transitions
    /// to screens not in `screens`, and verification images without a template.
    pub fn build(screens: Vec<Screen>) -> PilotResult<Self> {
        let mut index = HashMap::with_capacity(screens.len());
        for (i, screen) in screens.iter().enumerate() {
            if index.insert(screen.id, i).is_some() {
                return Err(PilotError::Graph(format!("duplicate screen id {}", screen.id)));
            }
        }

        for screen in &screens {
            if let Some(image) = screen.verification.iter().find(|v| !v.has_template()) {
                return Err(PilotError::Graph(format!(
                    "verification image '{}' on {} has no template",
                    image.name, screen.id
                )));
            }
            for t in &screen.transitions {
                if !index.contains_key(&t.target) {
                    return Err(PilotError::DanglingTransition {
                        from: screen.id,
                        target: t.target,
                    });
                }
            }
        }

        tracing::debug!(screens = screens.len(), "screen graph built");
        Ok(Self { screens, index })
    }

    /// Reads every `*.json` file in `dir` (sorted by file name). A file holds
    /// one screen record or an array of them.
    pub fn load_dir(dir: impl AsRef<Path>) -> PilotResult<Self> {
        let dir = dir.as_ref();
        let mut files: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| {
                PilotError::Config(format!("cannot read screens dir {}: {e}", dir.display()))
            })?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |ext| ext.eq_ignore_ascii_case("json")))
            .collect();
        files.sort();

        let mut screens = Vec::new();
        for path in &files {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str::<ScreenFile>(&content).map_err(|e| {
                PilotError::Config(format!("{}: {e}", path.display()))
            })? {
                ScreenFile::Many(many) => screens.extend(many),
                ScreenFile::One(one) => screens.push(*one),
            }
        }

        let graph = Self::build(screens)?;
        tracing::info!(
            path = %dir.display(),
            files = files.len(),
            screens = graph.len(),
            "screen graph loaded"
        );
        Ok(graph)
    }

    pub fn get(&self, id: ScreenId) -> Option<&Screen> {
        self.index.get(&id).map(|&i| &self.screens[i])
    }

    pub fn require(&self, id: ScreenId) -> PilotResult<&Screen> {
        self.get(id).ok_or(PilotError::UnknownScreen(id))
    }

    pub fn contains(&self, id: ScreenId) -> bool {
        self.index.contains_key(&id)
    }

    /// Screens in configuration order.
    pub fn screens(&self) -> impl Iterator<Item = &Screen> {
        self.screens.iter()
    }

    pub fn len(&self) -> usize {
        self.screens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.screens.is_empty()
    }

    /// Fewest-hops path from `from` to `to` as the transitions to take.
    /// Ties go to the transition declared first. `Some(vec![])` when
    /// `from == to`.
    pub fn find_path(&self, from: ScreenId, to: ScreenId) -> Option<Vec<&Transition>> {
        if from == to {
            return self.contains(from).then(Vec::new);
        }
        self.get(from)?;
        self.get(to)?;

        let mut visited: HashSet<ScreenId> = HashSet::from([from]);
        let mut parent: HashMap<ScreenId, (ScreenId, &Transition)> = HashMap::new();
        let mut queue = VecDeque::from([from]);

        while let Some(current) = queue.pop_front() {
            let Some(screen) = self.get(current) else {
                continue;
            };
            for t in &screen.transitions {
                if !visited.insert(t.target) {
                    continue;
                }
                parent.insert(t.target, (current, t));
                if t.target == to {
                    let mut path = Vec::new();
                    let mut node = to;
                    while let Some(&(prev, edge)) = parent.get(&node) {
                        path.push(edge);
                        node = prev;
                    }
                    path.reverse();
                    return Some(path);
                }
                queue.push_back(t.target);
            }
        }
        None
    }
}
