//! Upload template registry - one static definition per entity type
//!
//! A template fixes the sheet name, the instruction banner and the ordered
//! column list. Column ORDER is the binding contract: the parser maps cell
//! i to column i no matter what the header row says. Headers and
//! descriptions exist for the humans filling the file in.

use crate::EntityType;

/// One template column.
///
/// `header` is stored without the required marker; rendering appends " *"
/// to required columns. `key` is the stable machine name row maps are
/// keyed by. `target_field`, when present, names the record field the
/// value copies into; columns without it are lookup keys (the stock and
/// price SKU) or resolve names (category, subcategory, supplier, location).
#[derive(Debug, Clone, Copy)]
pub struct TemplateColumn {
    pub header: &'static str,
    pub description: &'static str,
    pub required: bool,
    pub key: &'static str,
    pub target_field: Option<&'static str>,
}

#[derive(Debug, Clone, Copy)]
pub struct TemplateDefinition {
    pub entity: EntityType,
    pub sheet_name: &'static str,
    pub instruction: &'static str,
    pub columns: &'static [TemplateColumn],
}

impl TemplateDefinition {
    pub fn required_columns(&self) -> impl Iterator<Item = &TemplateColumn> {
        self.columns.iter().filter(|c| c.required)
    }

    pub fn column(&self, key: &str) -> Option<&TemplateColumn> {
        self.columns.iter().find(|c| c.key == key)
    }
}

const fn col(
    header: &'static str,
    description: &'static str,
    required: bool,
    key: &'static str,
    target_field: Option<&'static str>,
) -> TemplateColumn {
    TemplateColumn {
        header,
        description,
        required,
        key,
        target_field,
    }
}

static PRODUCTS: TemplateDefinition = TemplateDefinition {
    entity: EntityType::Products,
    sheet_name: "Productos",
    instruction: "Complete una fila por producto. Los campos marcados con * son obligatorios. No modifique las filas 1 a 3.",
    columns: &[
        col("Código SKU", "Identificador único del producto. Ej: TORN-001", true, "sku", Some("sku")),
        col("Nombre", "Nombre del producto. Ej: Tornillo 8mm", true, "name", Some("name")),
        col("Descripción", "Descripción opcional", false, "description", Some("description")),
        col("Categoría", "Se crea automáticamente si no existe. Ej: Ferretería", false, "category", None),
        col("Subcategoría", "Subcategoría dentro de la categoría. Ej: Tornillos", false, "subcategory", None),
        col("Precio con IVA", "Precio de venta final. Ej: 1.210,50", false, "price", Some("price")),
        col("Costo sin IVA", "Costo de compra neto. Ej: 800,00", false, "cost", Some("cost")),
        col("Alícuota IVA", "0, 2.5, 5, 10.5, 21 o 27. Ej: 21", false, "tax_rate", Some("tax_rate")),
        col("Proveedor", "Debe existir; si no se encuentra queda sin asignar", false, "supplier", None),
        col("Código de barras", "EAN/UPC opcional", false, "barcode", Some("barcode")),
        col("Visibilidad", "Venta, Compra o Ambos", false, "visibility", Some("visibility")),
        col("Tipo de producto", "Producto, Servicio o Combo", false, "product_type", Some("product_type")),
    ],
};

static STOCK: TemplateDefinition = TemplateDefinition {
    entity: EntityType::Stock,
    sheet_name: "Stock",
    instruction: "Una fila por producto y ubicación. La cantidad REEMPLAZA el stock actual. No modifique las filas 1 a 3.",
    columns: &[
        col("Código SKU", "SKU de un producto existente. Ej: TORN-001", true, "sku", None),
        col("Cantidad", "Cantidad total en la ubicación. Ej: 150", true, "quantity", Some("quantity")),
        col("Ubicación", "Vacío = primera ubicación de la organización", false, "location", None),
    ],
};

static PRICES: TemplateDefinition = TemplateDefinition {
    entity: EntityType::Prices,
    sheet_name: "Precios",
    instruction: "Actualiza precios de productos existentes por SKU. No modifique las filas 1 a 3.",
    columns: &[
        col("Código SKU", "SKU de un producto existente. Ej: TORN-001", true, "sku", None),
        col("Precio con IVA", "Nuevo precio de venta. Ej: 1.210,50", false, "price", Some("price")),
        col("Costo sin IVA", "Nuevo costo neto. Ej: 800,00", false, "cost", Some("cost")),
    ],
};

static CUSTOMERS: TemplateDefinition = TemplateDefinition {
    entity: EntityType::Customers,
    sheet_name: "Clientes",
    instruction: "Complete una fila por cliente. Los campos marcados con * son obligatorios. No modifique las filas 1 a 3.",
    columns: &[
        col("Nombre", "Nombre o razón social. Ej: Juan Pérez", true, "name", Some("name")),
        col("CUIT", "CUIT/CUIL/DNI, usado para no duplicar. Ej: 20-12345678-9", false, "tax_id", Some("tax_id")),
        col("Email", "Correo electrónico opcional", false, "email", Some("email")),
        col("Teléfono", "Teléfono opcional", false, "phone", Some("phone")),
        col("Dirección", "Dirección opcional", false, "address", Some("address")),
    ],
};

static SUPPLIERS: TemplateDefinition = TemplateDefinition {
    entity: EntityType::Suppliers,
    sheet_name: "Proveedores",
    instruction: "Complete una fila por proveedor. Los campos marcados con * son obligatorios. No modifique las filas 1 a 3.",
    columns: &[
        col("Nombre", "Nombre o razón social. Ej: Distribuidora Sur", true, "name", Some("name")),
        col("CUIT", "CUIT usado para no duplicar. Ej: 30-87654321-0", false, "tax_id", Some("tax_id")),
        col("Email", "Correo electrónico opcional", false, "email", Some("email")),
        col("Teléfono", "Teléfono opcional", false, "phone", Some("phone")),
        col("Dirección", "Dirección opcional", false, "address", Some("address")),
    ],
};

/// Look up the template for an entity type. Total: every entity has one.
pub fn template_for(entity: EntityType) -> &'static TemplateDefinition {
    match entity {
        EntityType::Products => &PRODUCTS,
        EntityType::Stock => &STOCK,
        EntityType::Prices => &PRICES,
        EntityType::Customers => &CUSTOMERS,
        EntityType::Suppliers => &SUPPLIERS,
    }
}
