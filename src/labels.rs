use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Food classes the custom food model was trained on, in class-id order.
pub const FOOD_CLASSES: [&str; 10] = [
    "Apple Pie",
    "Chocolate",
    "French Fries",
    "Hotdog",
    "Nachos",
    "Pizza",
    "onion_rings",
    "pancakes",
    "spring_rolls",
    "tacos",
];

/// COCO classes of the generic pretrained checkpoint, in class-id order.
pub const COCO_CLASSES: [&str; 80] = [
    "person",
    "bicycle",
    "car",
    "motorcycle",
    "airplane",
    "bus",
    "train",
    "truck",
    "boat",
    "traffic light",
    "fire hydrant",
    "stop sign",
    "parking meter",
    "bench",
    "bird",
    "cat",
    "dog",
    "horse",
    "sheep",
    "cow",
    "elephant",
    "bear",
    "zebra",
    "giraffe",
    "backpack",
    "umbrella",
    "handbag",
    "tie",
    "suitcase",
    "frisbee",
    "skis",
    "snowboard",
    "sports ball",
    "kite",
    "baseball bat",
    "baseball glove",
    "skateboard",
    "surfboard",
    "tennis racket",
    "bottle",
    "wine glass",
    "cup",
    "fork",
    "knife",
    "spoon",
    "bowl",
    "banana",
    "apple",
    "sandwich",
    "orange",
    "broccoli",
    "carrot",
    "hot dog",
    "pizza",
    "donut",
    "cake",
    "chair",
    "couch",
    "potted plant",
    "bed",
    "dining table",
    "toilet",
    "tv",
    "laptop",
    "mouse",
    "remote",
    "keyboard",
    "cell phone",
    "microwave",
    "oven",
    "toaster",
    "sink",
    "refrigerator",
    "book",
    "clock",
    "vase",
    "scissors",
    "teddy bear",
    "hair drier",
    "toothbrush",
];

/// Ordered class names of a detection model.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassLabels {
    names: Vec<String>,
}

impl ClassLabels {
    /// Labels from an explicit list of names.
    pub fn new(names: Vec<String>) -> Self {
        Self { names }
    }

    /// The food label set.
    pub fn food() -> Self {
        Self::new(FOOD_CLASSES.iter().map(|s| s.to_string()).collect())
    }

    /// The COCO label set.
    pub fn coco() -> Self {
        Self::new(COCO_CLASSES.iter().map(|s| s.to_string()).collect())
    }

    /// Read one class name per line. Blank lines are skipped.
    pub fn from_file(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        let mut names = Vec::new();
        for line in reader.lines() {
            let line = line?;
            let name = line.trim();
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
        Ok(Self::new(names))
    }

    /// Name of a class id, `Object_<id>` when the id is outside the set.
    pub fn name(&self, class: u32) -> String {
        self.names
            .get(class as usize)
            .cloned()
            .unwrap_or_else(|| format!("Object_{class}"))
    }

    /// Number of classes.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the label set has no classes.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// All class names in class-id order.
    pub fn names(&self) -> &[String] {
        &self.names
    }
}
