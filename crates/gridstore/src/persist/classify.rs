use std::collections::HashMap;

/// Case-insensitive component type name pattern.
#[derive(Debug, Clone, Copy)]
enum Pattern {
    Exact(&'static str),
    Prefix(&'static str),
    Contains(&'static str),
}

impl Pattern {
    fn matches(self, lowered: &str) -> bool {
        match self {
            Pattern::Exact(pattern) => lowered == pattern,
            Pattern::Prefix(pattern) => lowered.starts_with(pattern),
            Pattern::Contains(pattern) => lowered.contains(pattern),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SkipFamily {
    Networking,
    Cosmetic,
    Physics,
    Transient,
    Bookkeeping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportantFamily {
    Storage,
    Solution,
    Stacking,
    Power,
    Access,
    Machine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentClass {
    Skip(SkipFamily),
    Solution,
    Generic(Option<ImportantFamily>),
}

impl ComponentClass {
    /// Failures of important components are reported as structural warnings;
    /// everything else is dropped quietly.
    pub fn is_important(self) -> bool {
        matches!(self, Self::Solution | Self::Generic(Some(_)))
    }
}

// Patterns are lowercase; names are lowered before matching.
const SKIP_TABLE: &[(Pattern, SkipFamily)] = &[
    (Pattern::Exact("metadata"), SkipFamily::Networking),
    (Pattern::Prefix("networked"), SkipFamily::Networking),
    (Pattern::Prefix("netsync"), SkipFamily::Networking),
    (Pattern::Exact("netid"), SkipFamily::Networking),
    (Pattern::Contains("session"), SkipFamily::Networking),
    (Pattern::Exact("actor"), SkipFamily::Networking),
    (Pattern::Exact("sprite"), SkipFamily::Cosmetic),
    (Pattern::Contains("appearance"), SkipFamily::Cosmetic),
    (Pattern::Contains("visuals"), SkipFamily::Cosmetic),
    (Pattern::Exact("pointlight"), SkipFamily::Cosmetic),
    (Pattern::Contains("lightvisuals"), SkipFamily::Cosmetic),
    (Pattern::Exact("eye"), SkipFamily::Cosmetic),
    (Pattern::Exact("transform"), SkipFamily::Physics),
    (Pattern::Contains("physics"), SkipFamily::Physics),
    (Pattern::Contains("fixtures"), SkipFamily::Physics),
    (Pattern::Contains("broadphase"), SkipFamily::Physics),
    (Pattern::Contains("collision"), SkipFamily::Physics),
    (Pattern::Contains("timer"), SkipFamily::Transient),
    (Pattern::Contains("cooldown"), SkipFamily::Transient),
    (Pattern::Contains("trigger"), SkipFamily::Transient),
    (Pattern::Prefix("active"), SkipFamily::Transient),
    (Pattern::Exact("containermanager"), SkipFamily::Bookkeeping),
    (Pattern::Contains("debug"), SkipFamily::Bookkeeping),
    (Pattern::Contains("cache"), SkipFamily::Bookkeeping),
];

const SOLUTION_TABLE: &[Pattern] = &[
    Pattern::Contains("solutioncontainer"),
    Pattern::Exact("solution"),
];

const IMPORTANT_TABLE: &[(Pattern, ImportantFamily)] = &[
    (Pattern::Contains("storage"), ImportantFamily::Storage),
    (Pattern::Contains("itemslots"), ImportantFamily::Storage),
    (Pattern::Contains("container"), ImportantFamily::Storage),
    (Pattern::Contains("stack"), ImportantFamily::Stacking),
    (Pattern::Contains("battery"), ImportantFamily::Power),
    (Pattern::Contains("powercell"), ImportantFamily::Power),
    (Pattern::Contains("fuel"), ImportantFamily::Power),
    (Pattern::Prefix("power"), ImportantFamily::Power),
    (Pattern::Contains("access"), ImportantFamily::Access),
    (Pattern::Contains("machine"), ImportantFamily::Machine),
    (Pattern::Contains("lathe"), ImportantFamily::Machine),
    (Pattern::Contains("generator"), ImportantFamily::Machine),
];

/// Classifies component type names, remembering each answer.
#[derive(Debug, Default)]
pub struct ComponentClassifier {
    memo: HashMap<String, ComponentClass>,
}

impl ComponentClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn classify(&mut self, component_type: &str) -> ComponentClass {
        if let Some(class) = self.memo.get(component_type) {
            return *class;
        }
        let class = classify_uncached(component_type);
        self.memo.insert(component_type.to_string(), class);
        class
    }

    pub fn memoized(&self) -> usize {
        self.memo.len()
    }
}

fn classify_uncached(component_type: &str) -> ComponentClass {
    let lowered = component_type.to_ascii_lowercase();
    if let Some((_, family)) = SKIP_TABLE
        .iter()
        .find(|(pattern, _)| pattern.matches(&lowered))
    {
        return ComponentClass::Skip(*family);
    }
    if SOLUTION_TABLE.iter().any(|pattern| pattern.matches(&lowered)) {
        return ComponentClass::Solution;
    }
    let important = IMPORTANT_TABLE
        .iter()
        .find(|(pattern, _)| pattern.matches(&lowered))
        .map(|(_, family)| *family);
    ComponentClass::Generic(important)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deny_table_wins_over_everything_else() {
        let mut classifier = ComponentClassifier::new();
        assert_eq!(
            classifier.classify("Transform"),
            ComponentClass::Skip(SkipFamily::Physics)
        );
        assert_eq!(
            classifier.classify("StorageVisuals"),
            ComponentClass::Skip(SkipFamily::Cosmetic)
        );
        assert_eq!(
            classifier.classify("ContainerManager"),
            ComponentClass::Skip(SkipFamily::Bookkeeping)
        );
        assert_eq!(
            classifier.classify("NetworkedEntity"),
            ComponentClass::Skip(SkipFamily::Networking)
        );
        assert_eq!(
            classifier.classify("PointLight"),
            ComponentClass::Skip(SkipFamily::Cosmetic)
        );
    }

    #[test]
    fn functional_components_sharing_a_cosmetic_word_are_kept() {
        let mut classifier = ComponentClassifier::new();
        for name in ["Flashlight", "LightBulb", "NetworkConfigurator"] {
            assert_eq!(
                classifier.classify(name),
                ComponentClass::Generic(None),
                "{name}"
            );
        }
    }

    #[test]
    fn solution_containers_take_the_specialized_path() {
        let mut classifier = ComponentClassifier::new();
        let class = classifier.classify("SolutionContainerManager");
        assert_eq!(class, ComponentClass::Solution);
        assert!(class.is_important());
    }

    #[test]
    fn important_families_only_change_severity() {
        let mut classifier = ComponentClassifier::new();
        assert_eq!(
            classifier.classify("Battery"),
            ComponentClass::Generic(Some(ImportantFamily::Power))
        );
        assert_eq!(
            classifier.classify("accessreader"),
            ComponentClass::Generic(Some(ImportantFamily::Access))
        );
        let label = classifier.classify("Label");
        assert_eq!(label, ComponentClass::Generic(None));
        assert!(!label.is_important());
    }

    #[test]
    fn answers_are_memoized_per_instance() {
        let mut classifier = ComponentClassifier::new();
        classifier.classify("Stack");
        classifier.classify("Stack");
        classifier.classify("Label");
        assert_eq!(classifier.memoized(), 2);
        assert_eq!(ComponentClassifier::new().memoized(), 0);
    }
}
